use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use phoenix_access::{ListQuery, Phoenix, Requirement};
use phoenix_core::{AccessMode, ArtifactSet, Principal, ResourceDraft, ResourceKind, UserId};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const OWNER: UserId = UserId(1);
const VIEWER: UserId = UserId(2);

fn problem_files(i: usize) -> ArtifactSet {
    ["description", "input", "output"]
        .into_iter()
        .map(|n| (n.to_string(), format!("{n} #{i}").into_bytes()))
        .collect()
}

/// `orgs` organizations, `VIEWER` a member of every other one, `per_org`
/// problems per organization cycling through all visibility levels.
async fn populate(orgs: usize, per_org: usize) -> Phoenix {
    let phoenix = Phoenix::in_memory();
    for o in 0..orgs {
        let org = phoenix
            .ledger
            .create_organization(OWNER, &format!("org-{o}"), "")
            .await
            .unwrap()
            .id;
        if o % 2 == 0 {
            phoenix.ledger.invite(OWNER, VIEWER, org, false).await.unwrap();
            phoenix.ledger.accept(VIEWER, org).await.unwrap();
        }
        for i in 0..per_org {
            let draft = ResourceDraft {
                name: format!("problem {o}/{i}"),
                difficulty: (i % 5) as i32,
                org_id: org,
                readable: (i % 4) as i32,
                writable: 1,
                ..Default::default()
            };
            phoenix
                .catalog
                .create(&Principal::User(OWNER), ResourceKind::Problem, draft, &problem_files(i))
                .await
                .unwrap();
        }
    }
    phoenix
}

// ---------------------------------------------------------------------------
// Benchmark: decision table
// ---------------------------------------------------------------------------

fn bench_requirement(c: &mut Criterion) {
    c.bench_function("requirement_for_level", |b| {
        b.iter(|| {
            for level in -1..=4 {
                black_box(Requirement::for_level(black_box(level), AccessMode::Read));
                black_box(Requirement::for_level(black_box(level), AccessMode::Write));
            }
        });
    });
}

// ---------------------------------------------------------------------------
// Benchmark: permission-filtered listing
// ---------------------------------------------------------------------------

fn bench_list(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("list_problems");
    for (orgs, per_org) in [(2, 50), (10, 50), (20, 100)] {
        let phoenix = rt.block_on(populate(orgs, per_org));
        let query = ListQuery {
            page: 1,
            sorter: 3,
            keyword: Some("problem".into()),
        };
        group.bench_with_input(
            BenchmarkId::new(format!("{orgs}orgs_{per_org}each"), orgs * per_org),
            &query,
            |b, query| {
                b.to_async(&rt).iter(|| async {
                    black_box(
                        phoenix
                            .catalog
                            .list(&Principal::User(VIEWER), ResourceKind::Problem, query)
                            .await
                            .unwrap(),
                    )
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_requirement, bench_list);
criterion_main!(benches);
