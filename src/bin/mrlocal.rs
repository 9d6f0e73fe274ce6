use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use mr_local::mr::function::wc;
use mr_local::mr::{run_job, CoordinatorConfig, JobConfig, MapFn, ReduceFn};
use tracing_subscriber::EnvFilter;

/// Word count over local files: `mrlocal <root> <reduce tasks> <workers> <input file>...`
/// Input paths are relative to `root`; results land in `<root>/mr-out-*`.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = env::args().collect::<Vec<String>>();
    if args.len() < 5 {
        eprintln!("usage: mrlocal <root> <reduce tasks> <workers> <input file>...");
        return Ok(());
    }

    let root = PathBuf::from(&args[1]);
    let reduce_n = args[2].parse::<usize>()?;
    let workers = args[3].parse::<usize>()?;
    let inputs = args[4..].to_vec();

    let map_fn: MapFn = Arc::new(wc::map);
    let reduce_fn: ReduceFn = Arc::new(wc::reduce);

    run_job(
        JobConfig {
            inputs,
            reduce_n,
            workers,
            root: root.clone(),
            coordinator: CoordinatorConfig::default(),
            timeout: None,
        },
        map_fn,
        reduce_fn,
    )
    .await?;

    println!("results written to {}", root.join("mr-out-*").display());
    Ok(())
}
