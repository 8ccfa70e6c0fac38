//! Stand-in engine binary for out-of-process session tests.
//!
//! Speaks the `hearth-engine session` startup contract: binds an ephemeral
//! port, prints the one-line greeting on stdout, then serves connections
//! until killed. Arguments are accepted and ignored.

use std::io::Write;

use anyhow::Result;
use hearth_client::mock_engine::MockEngine;
use hearth_protocol::Greeting;

#[tokio::main]
async fn main() -> Result<()> {
    let mock = MockEngine::start().await;
    let greeting = Greeting {
        endpoint: mock.endpoint(),
        version: mock.version(),
        token: mock.token().to_string(),
    };
    print!("{}", greeting.to_json_line()?);
    std::io::stdout().flush()?;

    std::future::pending::<()>().await;
    Ok(())
}
