//! Neuron models: the closed set of per-unit update rules a population can carry.
//!
//! Every model stores one contiguous array per parameter and per variable, indexed by
//! unit rank. Derivatives are evaluated from pre-update values and applied with a
//! forward-Euler step, gated by the refractory flag of the unit.
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use super::population::Inputs;

/// Floor applied to the flow, volume and deoxyhaemoglobin variables of the haemodynamic model.
pub const HAEMODYNAMIC_FLOOR: f64 = 0.01;

/// Generates a model struct whose fields are per-unit arrays, together with its
/// name-to-array accessors.
macro_rules! unit_model {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            parameters { $($(#[$pmeta:meta])* $param:ident = $pdefault:expr),* $(,)? }
            variables { $($(#[$vmeta:meta])* $var:ident = $vdefault:expr),* $(,)? }
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[allow(non_snake_case)]
        pub struct $name {
            $($(#[$pmeta])* pub $param: Vec<f64>,)*
            $($(#[$vmeta])* pub $var: Vec<f64>,)*
        }

        impl $name {
            /// Names of the parameters (constant unless explicitly written).
            pub const PARAMETERS: &'static [&'static str] = &[$(stringify!($param)),*];
            /// Names of the variables (mutated every step).
            pub const VARIABLES: &'static [&'static str] = &[$(stringify!($var)),*];

            /// Allocates all arrays for `size` units with their default values.
            pub fn new(size: usize) -> Self {
                $name {
                    $($param: vec![$pdefault; size],)*
                    $($var: vec![$vdefault; size],)*
                }
            }

            pub fn attribute(&self, name: &str) -> Option<&Vec<f64>> {
                match name {
                    $(stringify!($param) => Some(&self.$param),)*
                    $(stringify!($var) => Some(&self.$var),)*
                    _ => None,
                }
            }

            pub fn attribute_mut(&mut self, name: &str) -> Option<&mut Vec<f64>> {
                match name {
                    $(stringify!($param) => Some(&mut self.$param),)*
                    $(stringify!($var) => Some(&mut self.$var),)*
                    _ => None,
                }
            }

            fn clear_variables(&mut self) {
                $(self.$var = Vec::new();)*
            }
        }
    };
}

unit_model! {
    /// Leaky integrate-and-fire neuron driven by a current.
    ///
    /// `dv/dt = (v_rest - v) / tau + I` with `I = sum(exc) - sum(inh) + i_offset`.
    pub struct LeakyIntegrateAndFire {
        parameters {
            tau = 10.0,
            v_rest = 0.0,
            v_thresh = 1.0,
            v_reset = 0.0,
            i_offset = 0.0,
            tau_refrac = 0.0,
        }
        variables {
            I = 0.0,
            v = 0.0,
        }
    }
}

unit_model! {
    /// Izhikevich neuron with additive gaussian current noise.
    pub struct Izhikevich {
        parameters {
            noise = 0.0,
            a = 0.02,
            b = 0.2,
            c = -65.0,
            d = 8.0,
            v_thresh = 30.0,
            i_offset = 0.0,
            tau_refrac = 0.0,
        }
        variables {
            I = 0.0,
            v = -65.0,
            u = -13.0,
            g_exc = 0.0,
            g_inh = 0.0,
        }
    }
}

unit_model! {
    /// Integrate-and-fire neuron with exponentially decaying conductances.
    pub struct ConductanceLif {
        parameters {
            E_l = -65.0,
            E_exc = 0.0,
            E_inh = -80.0,
            tau = 20.0,
            tau_exc = 5.0,
            tau_inh = 10.0,
            i_offset = 0.0,
            v_thresh = -50.0,
            v_reset = -65.0,
            tau_refrac = 5.0,
        }
        variables {
            v = -65.0,
            g_exc = 0.0,
            g_inh = 0.0,
        }
    }
}

unit_model! {
    /// Rate-coded leaky integrator: `tau dmp/dt = -mp + sum(exc) - sum(inh) + baseline`.
    pub struct LeakyIntegrator {
        parameters {
            tau = 10.0,
            baseline = 0.0,
        }
        variables {
            mp = 0.0,
            r = 0.0,
        }
    }
}

unit_model! {
    /// Balloon model translating a blood-flow inducing input `sum(I_CBF)` into a BOLD signal.
    pub struct Haemodynamic {
        parameters {
            phi = 1.0,
            kappa = 1.0 / 1.54,
            gamma = 1.0 / 2.46,
            E_0 = 0.34,
            tau = 0.98,
            alpha = 0.33,
            V_0 = 0.02,
            v_0 = 40.3,
            TE = 40.0 / 1000.0,
            epsilon = 1.43,
            r_0 = 25.0,
            second = 1000.0,
            M = 0.149,
            alpha2 = 0.38,
            beta = 1.5,
        }
        variables {
            I_CBF = 0.0,
            s = 0.0,
            f_in = 1.0,
            E = 0.34,
            q = 1.0,
            v = 1.0,
            f_out = 1.0,
            BOLD = 0.0,
            r = 1.0,
            BOLD_Davis = 0.0,
        }
    }
}

unit_model! {
    /// Static rate source; `r` only changes when written from outside.
    pub struct RateInput {
        parameters {
            r = 0.0,
        }
        variables {}
    }
}

/// Output nonlinearity of a rate-coded leaky integrator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Transfer {
    /// `r = max(mp, 0)`
    Positive,
    /// `r = clamp(mp, 0, 1)`
    Saturating,
}

impl Transfer {
    pub fn apply(&self, mp: f64) -> f64 {
        match self {
            Transfer::Positive => mp.max(0.0),
            Transfer::Saturating => mp.clamp(0.0, 1.0),
        }
    }
}

/// The neuron model of a population, one variant per equation set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NeuronModel {
    LeakyIntegrateAndFire(LeakyIntegrateAndFire),
    Izhikevich(Izhikevich),
    ConductanceLif(ConductanceLif),
    LeakyIntegrator(LeakyIntegrator, Transfer),
    Haemodynamic(Haemodynamic),
    RateInput(RateInput),
}

#[inline]
fn gate(in_ref: bool) -> f64 {
    if in_ref {
        1.0
    } else {
        0.0
    }
}

impl NeuronModel {
    pub fn leaky_integrate_and_fire(size: usize) -> Self {
        NeuronModel::LeakyIntegrateAndFire(LeakyIntegrateAndFire::new(size))
    }

    pub fn izhikevich(size: usize) -> Self {
        NeuronModel::Izhikevich(Izhikevich::new(size))
    }

    pub fn conductance_lif(size: usize) -> Self {
        NeuronModel::ConductanceLif(ConductanceLif::new(size))
    }

    pub fn leaky_integrator(size: usize) -> Self {
        NeuronModel::LeakyIntegrator(LeakyIntegrator::new(size), Transfer::Positive)
    }

    pub fn haemodynamic(size: usize) -> Self {
        NeuronModel::Haemodynamic(Haemodynamic::new(size))
    }

    pub fn rate_input(size: usize) -> Self {
        NeuronModel::RateInput(RateInput::new(size))
    }

    /// Whether the model emits spikes (and thus goes through the spike gathering phase).
    pub fn is_spiking(&self) -> bool {
        matches!(
            self,
            NeuronModel::LeakyIntegrateAndFire(_)
                | NeuronModel::Izhikevich(_)
                | NeuronModel::ConductanceLif(_)
        )
    }

    /// Whether the model consumes one standard normal deviate per unit and step.
    pub fn draws_normal(&self) -> bool {
        matches!(self, NeuronModel::Izhikevich(_))
    }

    /// Number of units the arrays were allocated for.
    pub fn len(&self) -> usize {
        match self {
            NeuronModel::LeakyIntegrateAndFire(m) => m.tau.len(),
            NeuronModel::Izhikevich(m) => m.a.len(),
            NeuronModel::ConductanceLif(m) => m.tau.len(),
            NeuronModel::LeakyIntegrator(m, _) => m.tau.len(),
            NeuronModel::Haemodynamic(m) => m.phi.len(),
            NeuronModel::RateInput(m) => m.r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of the parameters of the model.
    pub fn parameters(&self) -> &'static [&'static str] {
        match self {
            NeuronModel::LeakyIntegrateAndFire(_) => LeakyIntegrateAndFire::PARAMETERS,
            NeuronModel::Izhikevich(_) => Izhikevich::PARAMETERS,
            NeuronModel::ConductanceLif(_) => ConductanceLif::PARAMETERS,
            NeuronModel::LeakyIntegrator(..) => LeakyIntegrator::PARAMETERS,
            NeuronModel::Haemodynamic(_) => Haemodynamic::PARAMETERS,
            NeuronModel::RateInput(_) => RateInput::PARAMETERS,
        }
    }

    /// Names of the variables of the model.
    pub fn variables(&self) -> &'static [&'static str] {
        match self {
            NeuronModel::LeakyIntegrateAndFire(_) => LeakyIntegrateAndFire::VARIABLES,
            NeuronModel::Izhikevich(_) => Izhikevich::VARIABLES,
            NeuronModel::ConductanceLif(_) => ConductanceLif::VARIABLES,
            NeuronModel::LeakyIntegrator(..) => LeakyIntegrator::VARIABLES,
            NeuronModel::Haemodynamic(_) => Haemodynamic::VARIABLES,
            NeuronModel::RateInput(_) => RateInput::VARIABLES,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Vec<f64>> {
        match self {
            NeuronModel::LeakyIntegrateAndFire(m) => m.attribute(name),
            NeuronModel::Izhikevich(m) => m.attribute(name),
            NeuronModel::ConductanceLif(m) => m.attribute(name),
            NeuronModel::LeakyIntegrator(m, _) => m.attribute(name),
            NeuronModel::Haemodynamic(m) => m.attribute(name),
            NeuronModel::RateInput(m) => m.attribute(name),
        }
    }

    pub fn attribute_mut(&mut self, name: &str) -> Option<&mut Vec<f64>> {
        match self {
            NeuronModel::LeakyIntegrateAndFire(m) => m.attribute_mut(name),
            NeuronModel::Izhikevich(m) => m.attribute_mut(name),
            NeuronModel::ConductanceLif(m) => m.attribute_mut(name),
            NeuronModel::LeakyIntegrator(m, _) => m.attribute_mut(name),
            NeuronModel::Haemodynamic(m) => m.attribute_mut(name),
            NeuronModel::RateInput(m) => m.attribute_mut(name),
        }
    }

    /// The output rate of a rate-coded model, read by dense and convolution projections.
    pub fn rate(&self) -> Option<&[f64]> {
        match self {
            NeuronModel::LeakyIntegrator(m, _) => Some(&m.r),
            NeuronModel::Haemodynamic(m) => Some(&m.r),
            NeuronModel::RateInput(m) => Some(&m.r),
            _ => None,
        }
    }

    /// Frees the variable arrays; parameters are kept.
    pub fn clear(&mut self) {
        match self {
            NeuronModel::LeakyIntegrateAndFire(m) => m.clear_variables(),
            NeuronModel::Izhikevich(m) => m.clear_variables(),
            NeuronModel::ConductanceLif(m) => m.clear_variables(),
            NeuronModel::LeakyIntegrator(m, _) => m.clear_variables(),
            NeuronModel::Haemodynamic(m) => m.clear_variables(),
            NeuronModel::RateInput(m) => m.clear_variables(),
        }
    }

    /// Draws the per-unit random numbers consumed by the next update.
    pub fn draw_normal<R: Rng>(&self, rng: &mut R, draws: &mut [f64]) {
        if self.draws_normal() {
            draws.iter_mut().for_each(|x| *x = rng.sample(StandardNormal));
        }
    }

    /// Integrates the model over one step.
    ///
    /// `in_ref[i]` is false while unit `i` is refractory: its evolving variables are then held.
    pub fn update(&mut self, dt: f64, in_ref: &[bool], inputs: &Inputs) {
        match self {
            NeuronModel::LeakyIntegrateAndFire(m) => {
                let exc = inputs.sum("exc");
                let inh = inputs.sum("inh");
                for i in 0..m.v.len() {
                    if in_ref[i] {
                        m.I[i] = Inputs::at(exc, i) - Inputs::at(inh, i) + m.i_offset[i];
                    }
                    let _v = (m.v_rest[i] - m.v[i]) / m.tau[i] + m.I[i];
                    m.v[i] += dt * _v * gate(in_ref[i]);
                }
            }
            NeuronModel::Izhikevich(m) => {
                let exc = inputs.sum("exc");
                let inh = inputs.sum("inh");
                for i in 0..m.v.len() {
                    // Conductances pile up while refractory and are consumed on the first free step.
                    m.g_exc[i] += Inputs::at(exc, i);
                    m.g_inh[i] += Inputs::at(inh, i);
                    if in_ref[i] {
                        m.I[i] = m.g_exc[i] - m.g_inh[i]
                            + m.i_offset[i]
                            + m.noise[i] * inputs.normal(i);
                    }
                    let _v = m.I[i] - m.u[i] + 0.04 * m.v[i].powi(2) + 5.0 * m.v[i] + 140.0;
                    let _u = m.a[i] * (m.b[i] * m.v[i] - m.u[i]);
                    m.v[i] += dt * _v * gate(in_ref[i]);
                    m.u[i] += dt * _u * gate(in_ref[i]);
                    if in_ref[i] {
                        m.g_exc[i] = 0.0;
                        m.g_inh[i] = 0.0;
                    }
                }
            }
            NeuronModel::ConductanceLif(m) => {
                let exc = inputs.sum("exc");
                let inh = inputs.sum("inh");
                for i in 0..m.v.len() {
                    m.g_exc[i] += Inputs::at(exc, i);
                    m.g_inh[i] += Inputs::at(inh, i);
                    let _v = (m.E_l[i] - m.v[i]
                        + m.g_exc[i] * (m.E_exc[i] - m.v[i])
                        + m.g_inh[i] * (m.E_inh[i] - m.v[i])
                        + m.i_offset[i])
                        / m.tau[i];
                    let _g_exc = -m.g_exc[i] / m.tau_exc[i];
                    let _g_inh = -m.g_inh[i] / m.tau_inh[i];
                    // Conductances keep decaying during the refractory period.
                    m.v[i] += dt * _v * gate(in_ref[i]);
                    m.g_exc[i] += dt * _g_exc;
                    m.g_inh[i] += dt * _g_inh;
                }
            }
            NeuronModel::LeakyIntegrator(m, transfer) => {
                let exc = inputs.sum("exc");
                let inh = inputs.sum("inh");
                for i in 0..m.mp.len() {
                    let _mp = (m.baseline[i] + Inputs::at(exc, i) - Inputs::at(inh, i) - m.mp[i])
                        / m.tau[i];
                    m.mp[i] += dt * _mp;
                    m.r[i] = transfer.apply(m.mp[i]);
                }
            }
            NeuronModel::Haemodynamic(m) => {
                let cbf = inputs.sum("I_CBF");
                for i in 0..m.s.len() {
                    m.I_CBF[i] = Inputs::at(cbf, i);

                    let _s = (m.phi[i] * m.I_CBF[i]
                        - m.kappa[i] * m.s[i]
                        - m.gamma[i] * (m.f_in[i] - 1.0))
                        / m.second[i];
                    let _f_in = m.s[i] / m.second[i];
                    m.s[i] += dt * _s;
                    m.f_in[i] += dt * _f_in;
                    m.f_in[i] = m.f_in[i].max(HAEMODYNAMIC_FLOOR);

                    m.E[i] = 1.0 - (1.0 - m.E_0[i]).powf(1.0 / m.f_in[i]);

                    let _q = (m.f_in[i] * m.E[i] / m.E_0[i] - (m.q[i] / m.v[i]) * m.f_out[i])
                        / (m.tau[i] * m.second[i]);
                    let _v = (m.f_in[i] - m.f_out[i]) / (m.tau[i] * m.second[i]);
                    m.q[i] += dt * _q;
                    m.q[i] = m.q[i].max(HAEMODYNAMIC_FLOOR);
                    m.v[i] += dt * _v;
                    m.v[i] = m.v[i].max(HAEMODYNAMIC_FLOOR);

                    m.f_out[i] = m.v[i].powf(1.0 / m.alpha[i]).max(HAEMODYNAMIC_FLOOR);

                    let k_1 = 4.3 * m.v_0[i] * m.E_0[i] * m.TE[i];
                    let k_2 = m.epsilon[i] * m.r_0[i] * m.E_0[i] * m.TE[i];
                    let k_3 = 1.0 - m.epsilon[i];
                    m.BOLD[i] = m.V_0[i]
                        * (k_1 * (1.0 - m.q[i])
                            + k_2 * (1.0 - m.q[i] / m.v[i])
                            + k_3 * (1.0 - m.v[i]));

                    m.r[i] = (m.E[i] * m.f_in[i] / m.E_0[i]).max(HAEMODYNAMIC_FLOOR);
                    m.BOLD_Davis[i] = m.M[i]
                        * (1.0
                            - m.f_in[i].powf(m.alpha2[i]) * (m.r[i] / m.f_in[i]).powf(m.beta[i]));
                }
            }
            NeuronModel::RateInput(_) => {}
        }
    }

    /// Whether unit `i` crossed its threshold after the last update.
    pub fn crossed_threshold(&self, i: usize) -> bool {
        match self {
            NeuronModel::LeakyIntegrateAndFire(m) => m.v[i] > m.v_thresh[i],
            NeuronModel::Izhikevich(m) => m.v[i] > m.v_thresh[i],
            NeuronModel::ConductanceLif(m) => m.v[i] > m.v_thresh[i],
            _ => false,
        }
    }

    /// Applies the reset rule of unit `i` after a spike.
    pub fn reset_unit(&mut self, i: usize) {
        match self {
            NeuronModel::LeakyIntegrateAndFire(m) => m.v[i] = m.v_reset[i],
            NeuronModel::Izhikevich(m) => {
                m.v[i] = m.c[i];
                m.u[i] += m.d[i];
            }
            NeuronModel::ConductanceLif(m) => m.v[i] = m.v_reset[i],
            _ => {}
        }
    }

    /// Refractory period of unit `i`, in the model's time unit.
    pub fn tau_refrac(&self, i: usize) -> f64 {
        match self {
            NeuronModel::LeakyIntegrateAndFire(m) => m.tau_refrac[i],
            NeuronModel::Izhikevich(m) => m.tau_refrac[i],
            NeuronModel::ConductanceLif(m) => m.tau_refrac[i],
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::population::Accumulator;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn accumulators(exc: Vec<f64>, inh: Vec<f64>) -> Vec<Accumulator> {
        vec![Accumulator::new("exc", exc), Accumulator::new("inh", inh)]
    }

    #[test]
    fn test_model_attributes() {
        let model = NeuronModel::izhikevich(3);
        assert_eq!(model.len(), 3);
        assert_eq!(model.attribute("c"), Some(&vec![-65.0; 3]));
        assert_eq!(model.attribute("u"), Some(&vec![-13.0; 3]));
        assert_eq!(model.attribute("w"), None);
        assert!(model.parameters().contains(&"tau_refrac"));
        assert!(model.variables().contains(&"g_exc"));
        assert!(model.is_spiking());
        assert!(model.rate().is_none());

        let model = NeuronModel::haemodynamic(2);
        assert!(!model.is_spiking());
        assert_eq!(model.rate(), Some(&[1.0, 1.0][..]));
    }

    #[test]
    fn test_lif_update_is_gated_by_refractoriness() {
        let mut model = NeuronModel::leaky_integrate_and_fire(2);
        let accs = accumulators(vec![0.5, 0.5], vec![0.1, 0.1]);
        let inputs = Inputs::new(&accs, &[]);
        model.update(1.0, &[true, false], &inputs);

        let v = model.attribute("v").unwrap();
        assert_relative_eq!(v[0], 0.4);
        assert_eq!(v[1], 0.0);
        assert_eq!(model.attribute("I").unwrap()[1], 0.0);
    }

    #[test]
    fn test_izhikevich_update_and_reset() {
        let mut model = NeuronModel::izhikevich(1);
        let accs = accumulators(vec![10.0], vec![0.0]);
        let inputs = Inputs::new(&accs, &[0.0]);
        model.update(0.5, &[true], &inputs);

        // dv = 0.04*65^2 - 5*65 + 140 + 13 + 10 = 7.0; du = 0.02*(0.2*-65 + 13) = 0.0
        assert_relative_eq!(model.attribute("v").unwrap()[0], -65.0 + 0.5 * 7.0);
        assert_relative_eq!(model.attribute("u").unwrap()[0], -13.0);
        assert_eq!(model.attribute("I").unwrap()[0], 10.0);
        assert_eq!(model.attribute("g_exc").unwrap()[0], 0.0);

        model.reset_unit(0);
        assert_eq!(model.attribute("v").unwrap()[0], -65.0);
        assert_eq!(model.attribute("u").unwrap()[0], -5.0);
    }

    #[test]
    fn test_izhikevich_keeps_input_received_while_refractory() {
        let mut model = NeuronModel::izhikevich(1);
        let accs = accumulators(vec![1.0], vec![0.25]);
        let inputs = Inputs::new(&accs, &[0.0]);

        model.update(1.0, &[false], &inputs);
        model.update(1.0, &[false], &inputs);
        assert_eq!(model.attribute("g_exc").unwrap()[0], 2.0);
        assert_eq!(model.attribute("g_inh").unwrap()[0], 0.5);
        assert_eq!(model.attribute("v").unwrap()[0], -65.0);

        model.update(1.0, &[true], &inputs);
        assert_relative_eq!(model.attribute("I").unwrap()[0], 3.0 - 0.75);
        assert_eq!(model.attribute("g_exc").unwrap()[0], 0.0);
        assert_eq!(model.attribute("g_inh").unwrap()[0], 0.0);
    }

    #[test]
    fn test_draw_normal() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut draws = vec![0.0; 16];
        NeuronModel::leaky_integrate_and_fire(16).draw_normal(&mut rng, &mut draws);
        assert!(draws.iter().all(|&x| x == 0.0));

        NeuronModel::izhikevich(16).draw_normal(&mut rng, &mut draws);
        assert!(draws.iter().any(|&x| x != 0.0));
    }

    #[test]
    fn test_leaky_integrator_transfer() {
        let mut model = NeuronModel::LeakyIntegrator(LeakyIntegrator::new(2), Transfer::Saturating);
        model.attribute_mut("tau").unwrap().fill(1.0);
        let accs = accumulators(vec![3.0, 0.0], vec![0.0, 2.0]);
        model.update(1.0, &[true, true], &Inputs::new(&accs, &[]));

        assert_eq!(model.attribute("mp").unwrap(), &vec![3.0, -2.0]);
        assert_eq!(model.rate().unwrap(), &[1.0, 0.0]);
    }

    #[test]
    fn test_haemodynamic_clamps() {
        let mut model = NeuronModel::haemodynamic(1);
        model.attribute_mut("f_in").unwrap()[0] = 0.001;
        model.attribute_mut("v").unwrap()[0] = 0.001;
        let accs = vec![Accumulator::new("I_CBF", vec![0.0])];
        model.update(1.0, &[true], &Inputs::new(&accs, &[]));

        for name in ["f_in", "q", "v", "f_out", "r"] {
            let value = model.attribute(name).unwrap()[0];
            assert!(value >= HAEMODYNAMIC_FLOOR, "{} = {}", name, value);
        }
        assert!(model.attribute("BOLD").unwrap()[0].is_finite());
        assert!(model.attribute("BOLD_Davis").unwrap()[0].is_finite());
    }

    #[test]
    fn test_clear_keeps_parameters() {
        let mut model = NeuronModel::conductance_lif(4);
        model.clear();
        assert_eq!(model.attribute("v"), Some(&vec![]));
        assert_eq!(model.attribute("tau").unwrap().len(), 4);
    }
}
