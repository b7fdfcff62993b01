use std::time::Duration;

use gatebench::{
    work::simulate_call, BoxError, GateConfig, Reporter, Scenario, SchedulingStrategy,
    StdoutReporter, WorkUnit,
};

#[tokio::main]
async fn main() {
    // Every request waits on a 200ms "remote call".
    let action = |_: WorkUnit| async {
        simulate_call(Duration::from_millis(200)).await;
        Ok::<_, BoxError>(())
    };

    let strategies = [
        SchedulingStrategy::pooled_default(),
        SchedulingStrategy::Lightweight,
    ];
    for strategy in strategies {
        let metrics = Scenario::builder()
            .name(format!("1000 requests on {strategy}"))
            .total_requests(1_000)
            .strategy(strategy)
            .action(action)
            .build()
            .run()
            .await
            .unwrap();
        StdoutReporter.report(&metrics).await.unwrap();
    }

    // Same work, but only 10 requests may talk to the backend at once
    let metrics = Scenario::builder()
        .name("1000 requests behind a gate of 10")
        .total_requests(1_000)
        .gate(GateConfig::new(10))
        .action(|_| async {
            simulate_call(Duration::from_millis(10)).await;
            Ok::<_, BoxError>(())
        })
        .build()
        .run()
        .await
        .unwrap();
    StdoutReporter.report(&metrics).await.unwrap();
}
