//! Background removal HTTP server
//!
//! Serves `POST /remove-background` and `GET /health` using the
//! bgremove-server library with ONNX Runtime or Tract backends.

use bgremove_server::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}
