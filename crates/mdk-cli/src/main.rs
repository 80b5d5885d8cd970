use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "mdk")]
#[command(about = "Margin desk portfolio accounting CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> desk -> overrides...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Replay a price/order scenario and print the run report as JSON
    Run {
        /// Layered config paths in merge order
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,

        /// Prices CSV: ts,symbol,price
        #[arg(long)]
        prices: String,

        /// Orders CSV: ts,symbol,quantity,limit_price,target,tag
        #[arg(long)]
        orders: Option<String>,

        /// Write the report here instead of stdout
        #[arg(long)]
        out: Option<String>,

        /// Refuse configs with keys the backtest does not read
        #[arg(long, default_value_t = false)]
        fail_on_unused_keys: bool,
    },

    /// Buying power and maximum order size for one security
    BuyingPower {
        /// Layered config paths in merge order
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,

        #[arg(long)]
        symbol: String,

        /// Last price of --symbol
        #[arg(long)]
        price: String,

        /// Additional SYMBOL=PRICE marks (repeatable)
        #[arg(long = "mark")]
        marks: Vec<String>,

        /// Target buying power fraction for the maximum-quantity solve
        #[arg(long, default_value = "1")]
        target: String,

        /// Also check whether an order of this signed quantity is affordable
        #[arg(long, allow_hyphen_values = true)]
        quantity: Option<String>,

        /// Evaluation time (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<String>,

        /// Refuse configs with keys the query does not read
        #[arg(long, default_value_t = false)]
        fail_on_unused_keys: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.cmd {
        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = mdk_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Run {
            config_paths,
            prices,
            orders,
            out,
            fail_on_unused_keys,
        } => commands::run::run_scenario(commands::run::RunArgs {
            config_paths,
            prices,
            orders,
            out,
            fail_on_unused_keys,
        })?,

        Commands::BuyingPower {
            config_paths,
            symbol,
            price,
            marks,
            target,
            quantity,
            at,
            fail_on_unused_keys,
        } => commands::query::buying_power(commands::query::QueryArgs {
            config_paths,
            symbol,
            price,
            marks,
            target,
            quantity,
            at,
            fail_on_unused_keys,
        })?,
    }

    Ok(())
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
