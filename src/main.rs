//! glaze - X11 compositing manager
//!
//! Redirects top-level windows to off-screen storage and recomposites
//! them, alpha-correct, onto a Composite overlay surface as Damage events
//! arrive. No window management, no effects: just the final image.

mod app;
mod atoms;
mod display;
mod overlay;
mod paint;
mod scene;
mod stacking;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "glaze=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting glaze compositor");

    let mut app = app::App::new()?;
    app.run()
}
