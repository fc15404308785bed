use std::io::Read;
use std::sync::Arc;

use clap::Parser;
use http::Method;
use tracing::info;
use tracing_subscriber::EnvFilter;

use railyard::echo::echo_handler;
use railyard::{
    HandlerRegistry, HandlerRequest, HandlerResponse, HttpServer, Registration, RuntimeConfig,
};

/// Demo server: a small route table over the railyard stack.
#[derive(Parser)]
#[command(name = "railyard", version, about)]
struct Cli {
    /// Address to bind
    #[arg(long, default_value = "127.0.0.1:8080", env = "RAILYARD_ADDR")]
    addr: String,

    /// Print the registered route table and continue
    #[arg(long)]
    dump_routes: bool,

    /// Verbose logging (overrides RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = RuntimeConfig::from_env();
    may::config().set_stack_size(config.stack_size);

    let registry = Arc::new(HandlerRegistry::new());

    registry.register(
        Registration::new("*", "/health", Method::GET, |_req: &HandlerRequest,
                                                        _body: &mut dyn Read| {
            HandlerResponse::json(200, serde_json::json!({ "status": "ok" }))
        })
        .api("railyard"),
    )?;

    registry.register(
        Registration::new("*", "/pets/{id}", Method::GET, |req: &HandlerRequest,
                                                           _body: &mut dyn Read| {
            HandlerResponse::json(
                200,
                serde_json::json!({ "pet": req.get_path_param("id") }),
            )
        })
        .api("pet_store"),
    )?;

    registry.register(
        Registration::new("*", "/pets", Method::POST, |_req: &HandlerRequest,
                                                       body: &mut dyn Read| {
            let mut raw = Vec::new();
            if body.read_to_end(&mut raw).is_err() {
                return HandlerResponse::error(400, "unreadable body");
            }
            match serde_json::from_slice::<serde_json::Value>(&raw) {
                Ok(pet) => HandlerResponse::json(201, serde_json::json!({ "created": pet })),
                Err(_) => HandlerResponse::error(400, "body is not valid JSON"),
            }
        })
        .content_type("application/json")
        .api("pet_store"),
    )?;

    registry.register(
        Registration::new("*", "/echo/{rest}", Method::POST, echo_handler)
            .open_end()
            .api("railyard"),
    )?;

    if cli.dump_routes {
        registry.dump_routes();
    }

    let server = HttpServer::with_config(registry, config);
    let handle = server.start(cli.addr.as_str())?;
    info!(addr = %handle.addr(), "railyard serving");
    handle
        .join()
        .map_err(|_| anyhow::anyhow!("accept loop panicked"))?;
    Ok(())
}
