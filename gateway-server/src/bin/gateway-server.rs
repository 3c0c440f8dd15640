//! Gateway server binary: loads config/env layering, initializes tracing, and serves the
//! HTTP/SSE route table.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "gateway-server")]
#[command(about = "LLM response orchestration gateway — HTTP/SSE server")]
struct Args {
    /// Listen address (default 127.0.0.1:8080)
    #[arg(long, value_name = "ADDR")]
    addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    gateway_config::load_and_apply("gateway", None::<&std::path::Path>).ok();
    gateway_config::init_tracing();

    let args = Args::parse();
    gateway_server::run_server(args.addr.as_deref()).await?;
    Ok(())
}
