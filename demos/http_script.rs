use std::time::Duration;

use karga_script::{
    Reporter, Scenario, Script, ShapeExecutor,
    aggregate::ScriptAggregate,
    report::{ScriptReport, StdoutReporter},
    transport::ReqwestTransport,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "demos/shop.json".to_owned());
    let script = Script::from_path(&path).unwrap();

    // One client pool for every user
    let transport = ReqwestTransport::with_timeout(Duration::from_secs(10)).unwrap();
    let scenario = Scenario::builder()
        .name(path)
        .script(script)
        .transport(transport)
        .build();

    // Stages come from the script; Ctrl-C ends the run early and still reports
    let results: ScriptAggregate = ShapeExecutor::builder()
        .build()
        .exec_until(&scenario, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .unwrap();

    let report = ScriptReport::from(results);
    StdoutReporter.report(&report).await.unwrap();
}
