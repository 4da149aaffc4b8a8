//! 상관 분석 벤치마크
//!
//! 인시던트 판정과 대응 규칙 평가 비용을 규칙 수에 따라 측정합니다.

use std::sync::Arc;

use chrono::Utc;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use flowguard_core::types::{
    ClassLabel, Classification, ConnState, FeatureRecord, FlowMetrics, Protocol, RollingCounters,
    TrafficRecord,
};
use flowguard_correlator::{Condition, InMemoryRuleStore, IncidentCorrelator, ResponseEngine, ResponseRule};

fn record() -> TrafficRecord {
    let features = FeatureRecord {
        id: "bench".to_owned(),
        timestamp: Utc::now(),
        source_ip: "10.0.0.5".parse().unwrap(),
        destination_ip: "10.0.0.1".parse().unwrap(),
        source_port: Some(40000),
        destination_port: Some(80),
        protocol: Protocol::Tcp,
        proto: "tcp".to_owned(),
        bytes: 60,
        flow: FlowMetrics {
            rate: 250.0,
            ..FlowMetrics::default()
        },
        service: None,
        state: Some(ConnState::Syn),
        is_sm_ips_ports: 0,
        counters: RollingCounters::default(),
    };
    let classification = Classification {
        prediction: 1,
        label: ClassLabel::Anomalous,
        confidence: 0.9,
        probabilities: None,
    };
    TrafficRecord::new(features, &classification, false)
}

fn bench_assess(c: &mut Criterion) {
    let correlator = IncidentCorrelator::new();
    let record = record();
    c.bench_function("incident/assess", |b| {
        b.iter(|| correlator.assess(black_box(&record)))
    });
}

fn bench_condition_parse(c: &mut Criterion) {
    c.bench_function("rule/condition_parse", |b| {
        b.iter(|| Condition::parse(black_box("severity=critical, status=active, threat_type=tcp")))
    });
}

fn bench_rule_evaluation(c: &mut Criterion) {
    let incident = IncidentCorrelator::new()
        .correlate(&record())
        .expect("anomalous record");
    let mut group = c.benchmark_group("rule/evaluate");

    for count in [1usize, 16, 256] {
        // 절반은 일치하지 않는 규칙
        let rules = (0..count)
            .map(|i| {
                let condition = if i % 2 == 0 {
                    "severity=critical,status=active"
                } else {
                    "status=blocked"
                };
                ResponseRule::new(format!("r{i}"), format!("rule {i}"), condition, "")
            })
            .collect();
        let store = Arc::new(InMemoryRuleStore::new(rules).unwrap().with_log_capacity(64));
        let engine = ResponseEngine::new(store);

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| engine.evaluate(black_box(&incident)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_assess, bench_condition_parse, bench_rule_evaluation);
criterion_main!(benches);
