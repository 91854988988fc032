use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pipeline_core::bootstrap::PipelineCore;
use pipeline_core::clock::SystemClock;
use pipeline_core::config::PipelineConfig;
use pipeline_core::resilience::ServiceIdentity;
use pipeline_core::state_machine::{EntityState, StateValidator};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn benchmark_guarded_call(c: &mut Criterion) {
    let rt = runtime();
    let mut config = PipelineConfig::default();
    config.rate_limits.clear();
    let core = PipelineCore::new(
        config,
        pipeline_core::store::StoreHandles::in_memory(SystemClock::shared()),
        SystemClock::shared(),
    );

    c.bench_function("execute_with_resilience_in_memory", |b| {
        b.iter(|| {
            rt.block_on(async {
                core.resilience()
                    .execute_with_resilience(ServiceIdentity::OpenAi, "bench", || async {
                        Ok::<_, String>(black_box(1))
                    })
                    .await
            })
        })
    });
}

fn benchmark_transition_validation(c: &mut Criterion) {
    c.bench_function("transition_validation", |b| {
        b.iter(|| {
            EntityState::ALL
                .iter()
                .flat_map(|from| EntityState::ALL.iter().map(move |to| (*from, *to)))
                .filter(|(from, to)| StateValidator::is_valid_transition(*from, *to))
                .count()
        })
    });
}

fn benchmark_monitor_cycle(c: &mut Criterion) {
    let rt = runtime();
    let core = PipelineCore::in_memory(SystemClock::shared());

    c.bench_function("monitor_cycle", |b| {
        b.iter(|| rt.block_on(core.monitor().run_cycle()))
    });
}

criterion_group!(
    benches,
    benchmark_guarded_call,
    benchmark_transition_validation,
    benchmark_monitor_cycle
);
criterion_main!(benches);
