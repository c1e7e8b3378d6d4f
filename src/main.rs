use clap::Parser;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use rusty_netsim::config::SimulationConfig;
use rusty_netsim::core::connectivity::LilMatrix;
use rusty_netsim::core::network::Network;
use rusty_netsim::core::neuron::NeuronModel;
use rusty_netsim::core::projection::{Connectivity, SynapseModel};
use rusty_netsim::core::synapse::{StpParameters, Weights};
use rusty_netsim::error::SimError;
use rusty_netsim::monitor::{Ranks, Schedule};
use rusty_netsim::simulator::Simulation;

#[derive(Parser, Debug)]
struct Args {
    /// The seed used for network sampling and simulation
    #[arg(long, default_value = "0")]
    seed: u64,
    /// The number of excitatory neurons
    #[arg(long, default_value = "800")]
    num_exc: usize,
    /// The number of inhibitory neurons
    #[arg(long, default_value = "200")]
    num_inh: usize,
    /// The connection probability
    #[arg(short = 'p', long, default_value = "0.1")]
    probability: f64,
    /// The number of simulation steps
    #[arg(short = 'n', long, default_value = "1000")]
    num_steps: u64,
    /// The integration time step (ms)
    #[arg(long, default_value = "1.0")]
    dt: f64,
    /// Optional JSON configuration, overriding seed and dt
    #[arg(long)]
    config: Option<String>,
    /// The log level, must be one of: error, warn, info, debug, trace
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn build_network(args: &Args, dt: f64, rng: &mut ChaCha8Rng) -> Result<Network, SimError> {
    let mut network = Network::new();

    let exc = network.add_population("exc", NeuronModel::izhikevich(args.num_exc));
    let inh = network.add_population("inh", NeuronModel::izhikevich(args.num_inh));
    for (id, size, a, d) in [(exc, args.num_exc, 0.02, 8.0), (inh, args.num_inh, 0.1, 2.0)] {
        if let Some(pop) = network.population_mut(id) {
            pop.set_attribute_all("a", vec![a; size])?;
            pop.set_attribute_all("d", vec![d; size])?;
            pop.set_attribute_all("noise", vec![5.0; size])?;
            pop.compute_firing_rate(100.0, dt);
        }
    }

    let sizes = [(exc, args.num_exc), (inh, args.num_inh)];
    for &(source, source_size) in sizes.iter() {
        for &(target, target_size) in sizes.iter() {
            let matrix = LilMatrix::fixed_probability(
                target_size,
                source_size,
                args.probability,
                source != target,
                rng,
            )?;
            let (target_name, synapse) = if source == exc {
                (
                    "exc",
                    SynapseModel::ShortTerm(StpParameters {
                        w: Weights::Uniform(0.5),
                        tau_rec: 200.0,
                        tau_facil: 20.0,
                        U: 0.2,
                    }),
                )
            } else {
                ("inh", SynapseModel::Static(Weights::Uniform(1.0)))
            };
            network.connect(source, target, target_name, Connectivity::Lil(matrix), synapse)?;
        }
    }
    Ok(network)
}

fn main() -> Result<(), SimError> {
    let args = Args::parse();

    let level = args
        .log_level
        .parse::<LevelFilter>()
        .map_err(|e| SimError::InvalidParameter(e.to_string()))?;
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d(%H:%M:%S)} {l} - {m}\n")))
        .build();
    let log_config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(level))
        .map_err(|e| SimError::IOError(e.to_string()))?;
    log4rs::init_config(log_config).map_err(|e| SimError::IOError(e.to_string()))?;

    log::info!("{:?}", args);

    let config = match &args.config {
        Some(path) => SimulationConfig::load_from(path)?,
        None => SimulationConfig {
            dt: args.dt,
            seed: args.seed,
            progress_interval: (args.num_steps / 10).max(1),
            ..Default::default()
        },
    };

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let network = build_network(&args, config.dt, &mut rng)?;
    log::info!("Network sampling: done!");

    let mut simulation = Simulation::from_config(network, &config)?;
    let handles = (0..simulation.network().num_populations())
        .map(|id| simulation.monitor_population(id, &["spike"], Ranks::All, Schedule::default()))
        .collect::<Result<Vec<_>, SimError>>()?;

    simulation.run(args.num_steps)?;

    for (id, handle) in handles.into_iter().enumerate() {
        let name = simulation
            .network()
            .population(id)
            .map_or("?", |pop| pop.name());
        let num_spikes: usize = simulation
            .monitor(handle)
            .and_then(|monitor| monitor.as_population())
            .and_then(|monitor| monitor.spikes())
            .map_or(0, |spikes| spikes.values().map(|events| events.len()).sum());
        let mean_rate = simulation
            .network()
            .population(id)
            .and_then(|pop| pop.attribute("r"))
            .map_or(0.0, |r| r.iter().sum::<f64>() / r.len().max(1) as f64);
        log::info!(
            "Population {}: {} spikes, mean rate over the last 100 ms: {:.2} Hz",
            name,
            num_spikes,
            mean_rate
        );
    }

    Ok(())
}
