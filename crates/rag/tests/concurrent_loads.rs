use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use datachat_core::{KnowledgeBase, UnitKind, Value};
use datachat_rag::{EngineConfig, Session, Table};

fn table(column: &str, rows: usize) -> Table {
    Table::new(
        vec![column.to_string(), "units".into()],
        (0..rows)
            .map(|i| vec![Value::Text(format!("{column} {i}")), Value::Int(i as i64)])
            .collect(),
    )
}

fn assert_consistent(table: &Table, knowledge: &KnowledgeBase) {
    assert_eq!(knowledge.store().len(), table.row_count() + 1);
    let summary = &knowledge.store().units()[0];
    assert_eq!(summary.kind, UnitKind::Summary);
    assert!(summary.content.contains(&table.columns()[0]));
}

#[test]
fn concurrent_loads_keep_table_and_index_together() {
    let mut config = EngineConfig::default();
    config.generation.default_backend = "extractive".into();
    let session = Arc::new(Session::new(config).unwrap());
    let finished = Arc::new(AtomicUsize::new(0));

    let writers: Vec<_> = [("warehouse", 3), ("supplier", 7)]
        .into_iter()
        .map(|(column, rows)| {
            let session = Arc::clone(&session);
            let finished = Arc::clone(&finished);
            thread::spawn(move || {
                for _ in 0..30 {
                    let status = session.load(table(column, rows));
                    assert!(status.starts_with("Loaded"), "{status}");
                }
                finished.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    let reader = {
        let session = Arc::clone(&session);
        let finished = Arc::clone(&finished);
        thread::spawn(move || {
            while finished.load(Ordering::SeqCst) < 2 {
                if let Some((table, knowledge)) = session.loaded() {
                    assert_consistent(&table, &knowledge);
                }
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    reader.join().unwrap();

    let (table, knowledge) = session.loaded().unwrap();
    assert_consistent(&table, &knowledge);
    assert!(session.get_preview().starts_with(&format!("{} | units\n", table.columns()[0])));
}
