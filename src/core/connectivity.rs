//! Connectivity of projections: sparse list-of-lists with its inverse index, and convolutions.
//!
//! Rows are indexed by the rank of the post-synaptic unit they feed (`post_rank[row]`),
//! columns hold the ranks of the pre-synaptic units (`pre_rank[row][col]`). The inverse
//! index maps every pre-synaptic rank back to the `(row, col)` pairs it appears at.
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::synapse::ConvolutionKernel;
use crate::error::SimError;

/// Forward list-of-lists connectivity with its inverse index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LilMatrix {
    num_rows: usize,
    num_columns: usize,
    post_rank: Vec<usize>,
    pre_rank: Vec<Vec<usize>>,
    row_of_post: Vec<Option<usize>>,
    inverse: Vec<Vec<(usize, usize)>>,
}

impl LilMatrix {
    /// Build the connectivity of a projection from `num_columns` source units onto `num_rows`
    /// target units.
    ///
    /// Every post-synaptic rank may appear in at most one row and every pre-synaptic rank at
    /// most once per row. Malformed input is rejected with an `InvalidTopology` error.
    pub fn from_lil(
        num_rows: usize,
        num_columns: usize,
        post_rank: Vec<usize>,
        pre_rank: Vec<Vec<usize>>,
    ) -> Result<Self, SimError> {
        if post_rank.len() != pre_rank.len() {
            return Err(SimError::InvalidTopology(format!(
                "{} post-synaptic ranks for {} rows of pre-synaptic ranks",
                post_rank.len(),
                pre_rank.len()
            )));
        }

        let mut row_of_post = vec![None; num_rows];
        for (row, &post) in post_rank.iter().enumerate() {
            match row_of_post.get_mut(post) {
                None => {
                    return Err(SimError::InvalidTopology(format!(
                        "post-synaptic rank {} out of range for {} rows",
                        post, num_rows
                    )))
                }
                Some(Some(_)) => {
                    return Err(SimError::InvalidTopology(format!(
                        "post-synaptic rank {} appears in several rows",
                        post
                    )))
                }
                Some(slot) => *slot = Some(row),
            }
        }

        let mut inverse = vec![vec![]; num_columns];
        for (row, pres) in pre_rank.iter().enumerate() {
            for (col, &pre) in pres.iter().enumerate() {
                let Some(entries) = inverse.get_mut(pre) else {
                    return Err(SimError::InvalidTopology(format!(
                        "pre-synaptic rank {} out of range for {} columns",
                        pre, num_columns
                    )));
                };
                if entries.last().is_some_and(|&(r, _)| r == row) {
                    return Err(SimError::InvalidTopology(format!(
                        "pre-synaptic rank {} appears twice in row {}",
                        pre, row
                    )));
                }
                entries.push((row, col));
            }
        }

        Ok(LilMatrix {
            num_rows,
            num_columns,
            post_rank,
            pre_rank,
            row_of_post,
            inverse,
        })
    }

    /// Check the ranges, the uniqueness of ranks and the inverse index, e.g., after loading.
    pub fn validate(&self) -> Result<(), SimError> {
        let rebuilt = Self::from_lil(
            self.num_rows,
            self.num_columns,
            self.post_rank.clone(),
            self.pre_rank.clone(),
        )?;
        if rebuilt.row_of_post != self.row_of_post || rebuilt.inverse != self.inverse {
            return Err(SimError::InvalidTopology(
                "the inverse index does not match the rows".to_string(),
            ));
        }
        Ok(())
    }

    /// Every source unit connected to every target unit. Without `allow_self`, the diagonal is skipped.
    pub fn all_to_all(num_rows: usize, num_columns: usize, allow_self: bool) -> Self {
        let post_rank: Vec<usize> = (0..num_rows).collect();
        let pre_rank = post_rank
            .iter()
            .map(|&post| {
                (0..num_columns)
                    .filter(|&pre| allow_self || pre != post)
                    .collect()
            })
            .collect();
        Self::build_unchecked(num_rows, num_columns, post_rank, pre_rank)
    }

    /// Unit `i` of the source connected to unit `i` of the target.
    pub fn one_to_one(size: usize) -> Self {
        Self::build_unchecked(
            size,
            size,
            (0..size).collect(),
            (0..size).map(|i| vec![i]).collect(),
        )
    }

    /// Every pair connected independently with probability `p`. Empty rows are dropped.
    pub fn fixed_probability<R: Rng>(
        num_rows: usize,
        num_columns: usize,
        p: f64,
        allow_self: bool,
        rng: &mut R,
    ) -> Result<Self, SimError> {
        if !(0.0..=1.0).contains(&p) {
            return Err(SimError::InvalidParameter(format!(
                "connection probability {} is not in [0, 1]",
                p
            )));
        }

        let mut post_rank = vec![];
        let mut pre_rank = vec![];
        for post in 0..num_rows {
            let pres: Vec<usize> = (0..num_columns)
                .filter(|&pre| (allow_self || pre != post) && rng.gen_bool(p))
                .collect();
            if !pres.is_empty() {
                post_rank.push(post);
                pre_rank.push(pres);
            }
        }
        Ok(Self::build_unchecked(num_rows, num_columns, post_rank, pre_rank))
    }

    fn build_unchecked(
        num_rows: usize,
        num_columns: usize,
        post_rank: Vec<usize>,
        pre_rank: Vec<Vec<usize>>,
    ) -> Self {
        let mut row_of_post = vec![None; num_rows];
        for (row, &post) in post_rank.iter().enumerate() {
            row_of_post[post] = Some(row);
        }
        let mut inverse = vec![vec![]; num_columns];
        for (row, pres) in pre_rank.iter().enumerate() {
            for (col, &pre) in pres.iter().enumerate() {
                inverse[pre].push((row, col));
            }
        }
        LilMatrix {
            num_rows,
            num_columns,
            post_rank,
            pre_rank,
            row_of_post,
            inverse,
        }
    }

    /// Number of target units the rows may refer to.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Number of source units the columns may refer to.
    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    /// Number of non-empty dendrites, i.e., rows actually stored.
    pub fn nb_dendrites(&self) -> usize {
        self.post_rank.len()
    }

    pub fn nb_synapses(&self) -> usize {
        self.pre_rank.iter().map(|pres| pres.len()).sum()
    }

    pub fn dendrite_size(&self, row: usize) -> Option<usize> {
        self.pre_rank.get(row).map(|pres| pres.len())
    }

    pub fn post_ranks(&self) -> &[usize] {
        &self.post_rank
    }

    pub fn pre_ranks(&self) -> &[Vec<usize>] {
        &self.pre_rank
    }

    /// The row fed into target unit `post`, if any.
    pub fn row_of(&self, post: usize) -> Option<usize> {
        self.row_of_post.get(post).copied().flatten()
    }

    /// The `(row, col)` of the synapse from `pre` onto `post`, if it exists.
    pub fn synapse_index(&self, post: usize, pre: usize) -> Option<(usize, usize)> {
        let row = self.row_of(post)?;
        let col = self.pre_rank[row].iter().position(|&p| p == pre)?;
        Some((row, col))
    }

    /// All `(row, col)` positions at which source unit `pre` appears, in row order.
    pub fn inverse(&self, pre: usize) -> &[(usize, usize)] {
        self.inverse.get(pre).map_or(&[][..], Vec::as_slice)
    }

    /// A per-synapse array shaped like the connectivity, filled with `value`.
    pub fn init_matrix_variable<T: Clone>(&self, value: T) -> Vec<Vec<T>> {
        self.pre_rank
            .iter()
            .map(|pres| vec![value.clone(); pres.len()])
            .collect()
    }

    /// Check that `values` has one entry per synapse, row by row.
    pub fn check_matrix_shape<T>(&self, name: &str, values: &[Vec<T>]) -> Result<(), SimError> {
        if values.len() != self.pre_rank.len() {
            return Err(SimError::ShapeMismatch(format!(
                "{} has {} rows, the connectivity has {}",
                name,
                values.len(),
                self.pre_rank.len()
            )));
        }
        for (row, (vals, pres)) in values.iter().zip(&self.pre_rank).enumerate() {
            if vals.len() != pres.len() {
                return Err(SimError::ShapeMismatch(format!(
                    "{} has {} entries in row {}, the connectivity has {}",
                    name,
                    vals.len(),
                    row,
                    pres.len()
                )));
            }
        }
        Ok(())
    }

    /// Validate a delay matrix. Transmission is instantaneous, so non-zero delays are dropped with a warning.
    pub fn check_delays(&self, delays: &[Vec<f64>]) -> Result<(), SimError> {
        self.check_matrix_shape("delays", delays)?;
        if delays.iter().flatten().any(|&d| d != 0.0) {
            log::warn!("Synaptic delays are not supported and will be ignored");
        }
        Ok(())
    }
}

/// Connectivity of a convolution: every row reads a kernel-sized neighbourhood of the source,
/// laid out on a three-dimensional geometry, placed at its own anchor coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Convolution {
    geometry: [usize; 3],
    post_rank: Vec<usize>,
    anchors: Vec<[usize; 3]>,
    kernel: ConvolutionKernel,
}

impl Convolution {
    /// Build a convolution onto `num_rows` target units from a source of shape `geometry`.
    pub fn new(
        num_rows: usize,
        geometry: [usize; 3],
        post_rank: Vec<usize>,
        anchors: Vec<[usize; 3]>,
        kernel: ConvolutionKernel,
    ) -> Result<Self, SimError> {
        if post_rank.len() != anchors.len() {
            return Err(SimError::InvalidTopology(format!(
                "{} post-synaptic ranks for {} anchors",
                post_rank.len(),
                anchors.len()
            )));
        }
        let mut seen = vec![false; num_rows];
        for &post in post_rank.iter() {
            match seen.get_mut(post) {
                Some(flag) if !*flag => *flag = true,
                Some(_) => {
                    return Err(SimError::InvalidTopology(format!(
                        "post-synaptic rank {} appears in several rows",
                        post
                    )))
                }
                None => {
                    return Err(SimError::InvalidTopology(format!(
                        "post-synaptic rank {} out of range for {} rows",
                        post, num_rows
                    )))
                }
            }
        }
        if let Some(anchor) = anchors
            .iter()
            .find(|anchor| anchor.iter().zip(&geometry).any(|(c, d)| c >= d))
        {
            return Err(SimError::InvalidTopology(format!(
                "anchor {:?} outside of the source geometry {:?}",
                anchor, geometry
            )));
        }
        Ok(Convolution {
            geometry,
            post_rank,
            anchors,
            kernel,
        })
    }

    /// Check the rows against a target of `num_rows` units and the anchors against the geometry.
    pub fn validate(&self, num_rows: usize) -> Result<(), SimError> {
        self.kernel.validate()?;
        Self::new(
            num_rows,
            self.geometry,
            self.post_rank.clone(),
            self.anchors.clone(),
            self.kernel.clone(),
        )
        .map(|_| ())
    }

    /// Anchor every target unit at the same coordinates in a source of identical shape.
    pub fn same(geometry: [usize; 3], kernel: ConvolutionKernel) -> Result<Self, SimError> {
        let anchors: Vec<[usize; 3]> = (0..geometry[0])
            .flat_map(|i| (0..geometry[1]).flat_map(move |j| (0..geometry[2]).map(move |k| [i, j, k])))
            .collect();
        let size = anchors.len();
        Self::new(size, geometry, (0..size).collect(), anchors, kernel)
    }

    /// Number of source units the geometry spans.
    pub fn source_size(&self) -> usize {
        self.geometry.iter().product()
    }

    pub fn geometry(&self) -> [usize; 3] {
        self.geometry
    }

    pub fn kernel(&self) -> &ConvolutionKernel {
        &self.kernel
    }

    pub fn post_ranks(&self) -> &[usize] {
        &self.post_rank
    }

    pub fn nb_dendrites(&self) -> usize {
        self.post_rank.len()
    }

    /// The input of row `row`, given the rates of the source.
    pub fn weighted_sum(&self, row: usize, rates: &[f64]) -> f64 {
        self.kernel
            .weighted_sum(rates, self.geometry, self.anchors[row])
    }
}
