use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};

use relmesh_core::engine::{
    CheckEngine, CheckError, CheckRequest, EngineConfig, RequestContext, SchemaReader, TupleReader,
};
use relmesh_core::schema::{EntityDefinition, SchemaDefinition, parse_schema};
use relmesh_core::tuple::{ObjectRef, Tuple};

struct BenchStore {
    tuples: Vec<Tuple>,
}

impl TupleReader for BenchStore {
    async fn query_tuples(
        &self,
        object: &ObjectRef,
        relation: &str,
    ) -> Result<Vec<Tuple>, CheckError> {
        let mut results: Vec<Tuple> = self
            .tuples
            .iter()
            .filter(|t| &t.object == object && t.relation == relation)
            .cloned()
            .collect();
        results.sort_by(|a, b| {
            (&a.subject.entity, a.subject.relation_key())
                .cmp(&(&b.subject.entity, b.subject.relation_key()))
        });
        Ok(results)
    }
}

struct BenchSchema {
    schema: SchemaDefinition,
}

impl SchemaReader for BenchSchema {
    async fn entity(&self, name: &str) -> Result<Arc<EntityDefinition>, CheckError> {
        self.schema
            .get_entity(name)
            .map(|e| Arc::new(e.clone()))
            .ok_or_else(|| CheckError::UndefinedEntity(name.to_string()))
    }
}

const SCHEMA: &str = r#"
    entity user {}
    entity group {
        relation member @user @group#member
    }
    entity document {
        relation owner @user
        relation editor @user @group#member
        relation viewer @user @group#member
        action view = viewer or editor or owner
    }
"#;

fn make_engine(tuples: Vec<Tuple>) -> CheckEngine<BenchStore, BenchSchema> {
    CheckEngine::new(
        Arc::new(BenchStore { tuples }),
        Arc::new(BenchSchema {
            schema: SchemaDefinition::from(&parse_schema(SCHEMA).unwrap()),
        }),
        EngineConfig::default(),
    )
}

fn tuple(s: &str) -> Tuple {
    s.parse().unwrap()
}

fn bench_direct_check(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = make_engine(vec![tuple("document:1#owner@user:alice")]);
    let request = CheckRequest {
        subject: "user:alice".parse().unwrap(),
        action: "view".to_string(),
        object: "document:1".parse().unwrap(),
    };

    c.bench_function("check_direct_grant", |b| {
        b.iter(|| {
            rt.block_on(async {
                engine
                    .check(&request, &RequestContext::unbounded())
                    .await
                    .unwrap()
            })
        })
    });
}

fn bench_nested_group_chain(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    // user -> group:g9#member -> ... -> group:g0#member -> document viewer
    let mut tuples = vec![tuple("document:1#viewer@group:g0#member")];
    for i in 0..9 {
        tuples.push(tuple(&format!(
            "group:g{}#member@group:g{}#member",
            i,
            i + 1
        )));
    }
    tuples.push(tuple("group:g9#member@user:alice"));
    let engine = make_engine(tuples);
    let request = CheckRequest {
        subject: "user:alice".parse().unwrap(),
        action: "view".to_string(),
        object: "document:1".parse().unwrap(),
    };

    c.bench_function("check_nested_group_chain", |b| {
        b.iter(|| {
            rt.block_on(async {
                engine
                    .check(&request, &RequestContext::unbounded())
                    .await
                    .unwrap()
            })
        })
    });
}

fn bench_wide_fanout_miss(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut tuples = Vec::new();
    for i in 0..500 {
        tuples.push(tuple(&format!("document:1#viewer@user:u{i}")));
    }
    let engine = make_engine(tuples);
    let request = CheckRequest {
        subject: "user:absent".parse().unwrap(),
        action: "view".to_string(),
        object: "document:1".parse().unwrap(),
    };

    c.bench_function("check_wide_fanout_miss", |b| {
        b.iter(|| {
            rt.block_on(async {
                engine
                    .check(&request, &RequestContext::unbounded())
                    .await
                    .unwrap()
            })
        })
    });
}

criterion_group!(
    benches,
    bench_direct_check,
    bench_nested_group_chain,
    bench_wide_fanout_miss
);
criterion_main!(benches);
