use clap::Parser;
use color_eyre::eyre::{self, WrapErr};
use lsqsim::{config, request, sim, trace};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[clap(
    version = option_env!("CARGO_PKG_VERSION").unwrap_or("unknown"),
    about = "simulate the coalescing load/store queue of a GPU streaming multiprocessor",
)]
pub struct Options {
    #[clap(short = 'c', long = "config", help = "simulation config (yaml)")]
    pub config: Option<PathBuf>,
    #[clap(short = 't', long = "trace", help = "trace of warp requests (json)")]
    pub trace: Option<PathBuf>,
    #[clap(
        long = "requests",
        default_value = "64",
        help = "number of synthetic requests without a trace"
    )]
    pub num_requests: usize,
    #[clap(
        long = "stride",
        default_value = "4",
        help = "lane stride in bytes of synthetic requests"
    )]
    pub stride: u64,
    #[clap(long = "stores", help = "synthetic requests are stores")]
    pub stores: bool,
    #[clap(long = "warp-size")]
    pub warp_size: Option<usize>,
    #[clap(long = "num-banks")]
    pub num_banks: Option<usize>,
    #[clap(long = "bank-depth")]
    pub bank_depth: Option<usize>,
    #[clap(long = "line-size")]
    pub line_size: Option<u32>,
    #[clap(long = "bank-hash", value_enum)]
    pub bank_hashing_function: Option<config::BankHashingFunction>,
    #[clap(long = "stats-file", help = "output stats file (json)")]
    pub stats_file: Option<PathBuf>,
    #[clap(long = "json", help = "print stats as json")]
    pub json: bool,
    #[clap(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Options {
    fn apply(&self, config: &mut config::LSQ) {
        if let Some(warp_size) = self.warp_size {
            config.warp_size = warp_size;
        }
        if let Some(num_banks) = self.num_banks {
            config.num_banks = num_banks;
        }
        if let Some(bank_depth) = self.bank_depth {
            config.bank_depth = bank_depth;
        }
        if let Some(line_size) = self.line_size {
            config.line_size = line_size;
        }
        if let Some(bank_hashing_function) = self.bank_hashing_function {
            config.bank_hashing_function = bank_hashing_function;
        }
    }
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let options = Options::parse();

    let mut log_builder = env_logger::Builder::new();
    log_builder.filter_level(match options.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    });
    log_builder.parse_default_env();
    log_builder.init();

    let mut config = match options.config {
        Some(ref path) => sim::Config::from_file(path)
            .wrap_err_with(|| format!("failed to load config {}", path.display()))?,
        None => sim::Config::default(),
    };
    options.apply(&mut config.lsq);
    config.lsq.validate()?;

    let requests = match options.trace {
        Some(ref path) => trace::read(path)?,
        None => {
            let kind = if options.stores {
                request::Kind::Store
            } else {
                request::Kind::Load
            };
            trace::strided(
                options.num_requests,
                config.lsq.warp_size,
                options.stride,
                4,
                kind,
            )
        }
    };

    let start = std::time::Instant::now();
    let mut sim = sim::Simulation::new(&config)?;
    for (i, request) in requests.into_iter().enumerate() {
        let request = request
            .build()
            .wrap_err_with(|| format!("invalid request {i}"))?;
        sim.push(request);
    }
    let stats = sim.run()?;

    if let Some(ref path) = options.stats_file {
        let writer = std::io::BufWriter::new(std::fs::File::create(path)?);
        serde_json::to_writer_pretty(writer, stats)?;
    }
    if options.json {
        println!("{}", serde_json::to_string_pretty(stats)?);
    } else {
        print!("{stats}");
    }
    eprintln!("simulation done in {:?}", start.elapsed());
    Ok(())
}
