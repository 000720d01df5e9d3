use clap::Parser;
use sqldash::auth::Principal;
use sqldash::config::{Args, Config};
use sqldash::model::SavedDashboard;
use sqldash::{dashboard_index, postgres, saved_dashboard};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::from(&args);
    let principal = Principal::new(args.user.clone(), args.permissions);
    let form = args.form_data();

    let mut backend = postgres::connect(&config).await?;

    let context = match &args.dashboard {
        Some(path) => {
            let dashboard: SavedDashboard = serde_json::from_str(&std::fs::read_to_string(path)?)?;
            info!(slug = %dashboard.slug, "rendering saved dashboard");
            saved_dashboard(&mut backend, &principal, &dashboard, &form).await?
        }
        None => dashboard_index(&mut backend, &principal, &form).await?,
    };

    let out = if args.pretty {
        serde_json::to_string_pretty(&context)?
    } else {
        serde_json::to_string(&context)?
    };
    println!("{out}");
    Ok(())
}
