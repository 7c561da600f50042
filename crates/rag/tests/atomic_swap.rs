use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use datachat_core::{DocumentConfig, HashEmbedder, Table, Value};
use datachat_rag::Retriever;

fn table(rows: usize, label: &str) -> Table {
    Table::new(
        vec!["name".into(), "units".into()],
        (0..rows)
            .map(|i| vec![Value::Text(format!("{label} {i}")), Value::Int(i as i64)])
            .collect(),
    )
}

#[test]
fn queries_never_mix_builds() {
    let retriever = Arc::new(Retriever::new(
        Arc::new(HashEmbedder::default()),
        DocumentConfig::default(),
        1000,
    ));
    retriever.index(&table(3, "small")).unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let retriever = Arc::clone(&retriever);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for round in 0..40 {
                let rows = if round % 2 == 0 { 6 } else { 3 };
                retriever.index(&table(rows, "firm")).unwrap();
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let retriever = Arc::clone(&retriever);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut checked = 0usize;
                while !done.load(Ordering::SeqCst) || checked == 0 {
                    let retrieval = retriever.retrieve("firm units", 20).unwrap().unwrap();
                    assert!(retrieval
                        .hits
                        .iter()
                        .all(|hit| hit.id.generation() == retrieval.generation));
                    assert!(retrieval.hits.len() == 4 || retrieval.hits.len() == 7);
                    checked += 1;
                }
                checked
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
}
