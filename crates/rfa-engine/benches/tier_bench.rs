use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_decimal::Decimal;

fn bench_tiers(c: &mut Criterion) {
    let rfa = rfa_core::standard_global_rfa();
    c.bench_function("select_tier", |b| {
        b.iter(|| rfa_engine::select_tier(black_box(Decimal::new(123_456, 0)), rfa.tiers()))
    });

    let now = chrono::Utc::now();
    let rules: Vec<rfa_core::ContractRule> = rfa_core::standard_rules()
        .into_iter()
        .enumerate()
        .map(|(i, r)| rfa_core::ContractRule {
            id: rfa_core::RuleId(i as u64 + 1),
            contract_id: rfa_core::ContractId(1),
            key: r.key.into(),
            label: r.label.into(),
            tiers: r.tiers,
            bonus_groups: Vec::new(),
            created_at: now,
            updated_at: now,
        })
        .collect();
    let contract = rfa_core::Contract {
        id: rfa_core::ContractId(1),
        name: rfa_core::STANDARD_CONTRACT_NAME.into(),
        description: None,
        scope: rfa_core::ContractScope::Adherent,
        is_default: true,
        is_active: true,
        use_combined_global_rate: true,
        marketing_rules: Default::default(),
        created_at: now,
        updated_at: now,
    };
    let mut turnover = rfa_engine::AccountTurnover::default();
    for f in rfa_core::GLOBAL_FIELDS.iter() {
        turnover.global.insert(f.key.into(), Decimal::new(45_000, 0));
    }
    for f in rfa_core::TRI_FIELDS.iter() {
        turnover.tri.insert(f.key.into(), Decimal::new(30_000, 0));
    }
    let index = rfa_engine::RuleIndex::new(&rules);
    c.bench_function("compute_rebates", |b| {
        b.iter(|| rfa_engine::compute_rebates(black_box(&turnover), &index, &contract))
    });
}

criterion_group!(benches, bench_tiers);
criterion_main!(benches);
