//! End-to-end tests through the public API: store, sessions, contexts and
//! every on-disk format.

use data_vault::vault_core::path::{decode_segment, encode_segment};
use data_vault::vault_core::{ColumnValue, DataType, Dependent, Independent, ParamValue, Row, Shape};
use data_vault::{
    ChannelSink, DataBlock, Format, NullSink, SessionStore, VaultContext, VaultError, VaultEvent,
    VaultPath, VaultSettings,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn store(root: &Path) -> Arc<SessionStore> {
    Arc::new(SessionStore::new(VaultSettings::new(root), Arc::new(NullSink)).unwrap())
}

fn scalar_columns() -> (Vec<Independent>, Vec<Dependent>) {
    (
        vec![Independent::scalar("time", "s")],
        vec![Dependent::scalar("voltage", "ch1", "V")],
    )
}

fn float_rows(range: std::ops::Range<i32>) -> Vec<Row> {
    range
        .map(|i| vec![ColumnValue::F64(f64::from(i)), ColumnValue::F64(f64::from(i) * 0.5)])
        .collect()
}

#[test]
fn test_awkward_names_survive_the_filesystem() {
    let root = tempdir().unwrap();
    let name = r#"a/b\c:d*e?f"g<h>i|j%k"#;
    let encoded = encode_segment(name);
    assert!(!encoded.contains('/'));
    assert_eq!(decode_segment(&encoded).unwrap(), name);

    let mut ctx = VaultContext::new(store(root.path())).unwrap();
    ctx.mkdir(name).unwrap();
    assert_eq!(ctx.dir(&[]).unwrap().0, vec![name.to_string()]);
    assert!(matches!(
        ctx.cd(&format!("/{}", encoded), false),
        Err(VaultError::DirectoryNotFound { .. })
    ));

    let (indeps, deps) = scalar_columns();
    let session = store(root.path()).get(&VaultPath::root().join(name)).unwrap();
    let dataset = session.new_dataset("x:y", indeps, deps, None).unwrap();
    assert_eq!(dataset.name(), "00001 - x:y");
    assert_eq!(session.list_datasets().unwrap(), vec!["00001 - x:y"]);
}

#[test]
fn test_dataset_numbers_keep_counting_after_restart() {
    let root = tempdir().unwrap();
    {
        let mut ctx = VaultContext::new(store(root.path())).unwrap();
        for title in ["first", "second"] {
            let (indeps, deps) = scalar_columns();
            ctx.new_dataset(title, indeps, deps, None).unwrap();
        }
    }

    let mut ctx = VaultContext::new(store(root.path())).unwrap();
    let (indeps, deps) = scalar_columns();
    let (_, name) = ctx.new_dataset("third", indeps, deps, None).unwrap();
    assert_eq!(name, "00003 - third");
    assert_eq!(
        ctx.dir(&[]).unwrap().1,
        vec!["00001 - first", "00002 - second", "00003 - third"]
    );
}

#[test]
fn test_paged_reads_match_a_single_read() {
    for format in [Format::LegacyCsv, Format::Simple, Format::Extended] {
        let root = tempdir().unwrap();
        let mut ctx = VaultContext::new(store(root.path())).unwrap();
        let (indeps, deps) = scalar_columns();
        ctx.new_dataset("paged", indeps, deps, Some(format)).unwrap();
        let rows = float_rows(0..23);
        ctx.add(&rows[..10]).unwrap();
        ctx.add(&rows[10..]).unwrap();

        let mut paged = Vec::new();
        loop {
            let page = ctx.get(Some(4), None, false, false).unwrap();
            if page.data.is_empty() {
                break;
            }
            match page.data {
                DataBlock::Rows(chunk) => paged.extend(chunk),
                DataBlock::Columns(_) => panic!("rows requested"),
            }
        }
        assert_eq!(paged, rows, "format {}", format);

        let all = ctx.get(None, Some(0), false, false).unwrap();
        assert_eq!(all.next, 23);
        assert_eq!(all.data, DataBlock::Rows(rows));
    }
}

#[test]
fn test_duplicate_parameter_is_rejected() {
    let root = tempdir().unwrap();
    let mut ctx = VaultContext::new(store(root.path())).unwrap();
    let (indeps, deps) = scalar_columns();
    ctx.new_dataset("params", indeps, deps, None).unwrap();

    ctx.add_parameter("Gain", ParamValue::Value(2.5, Some("dB".into())))
        .unwrap();
    let err = ctx.add_parameter("Gain", ParamValue::Int(7)).unwrap_err();
    assert!(matches!(err, VaultError::ParameterInUse { ref name } if name == "Gain"));

    let err = ctx
        .add_parameters(vec![
            ("offset".into(), ParamValue::Int(1)),
            ("Gain".into(), ParamValue::Int(2)),
        ])
        .unwrap_err();
    assert!(matches!(err, VaultError::ParameterInUse { .. }));

    assert_eq!(ctx.parameters().unwrap().len(), 1);
    assert_eq!(
        ctx.get_parameter("gain", false).unwrap(),
        ParamValue::Value(2.5, Some("dB".into()))
    );
    assert!(matches!(
        ctx.get_parameter("gain", true),
        Err(VaultError::BadParameter { .. })
    ));
}

#[tokio::test]
async fn test_reader_is_woken_once_per_catch_up() {
    let root = tempdir().unwrap();
    let (sink, mut rx) = ChannelSink::new();
    let store = Arc::new(SessionStore::new(VaultSettings::new(root.path()), Arc::new(sink)).unwrap());

    let mut writer = VaultContext::new(store.clone()).unwrap();
    let mut reader = VaultContext::new(store).unwrap();
    let (indeps, deps) = scalar_columns();
    let (_, name) = writer.new_dataset("stream", indeps, deps, None).unwrap();

    reader.open(name.as_str()).unwrap();
    assert!(reader.get(None, None, false, false).unwrap().data.is_empty());

    writer.add(&float_rows(0..2)).unwrap();
    writer.add(&float_rows(2..4)).unwrap();

    let mut wakeups = Vec::new();
    while let Ok((listener, event)) = rx.try_recv() {
        if let VaultEvent::DataAvailable { dataset, .. } = event {
            wakeups.push((listener, dataset));
        }
    }
    assert_eq!(wakeups, vec![(reader.id(), name.clone())]);

    let page = reader.get(None, None, false, false).unwrap();
    assert_eq!(page.data.len(), 4);
    writer.add(&float_rows(4..5)).unwrap();
    let (listener, event) = rx.try_recv().unwrap();
    assert_eq!(listener, reader.id());
    assert!(matches!(event, VaultEvent::DataAvailable { .. }));
}

#[test]
fn test_extended_dataset_with_typed_columns() {
    let root = tempdir().unwrap();
    let vault = store(root.path());
    let indeps = vec![Independent::new("index", Shape::scalar(), DataType::I32, "").unwrap()];
    let deps = vec![
        Dependent::new("trace", "scope", Shape(vec![3]), DataType::F64, "V").unwrap(),
        Dependent::new("note", "", Shape::scalar(), DataType::Str, "").unwrap(),
    ];
    let rows: Vec<Row> = (0..3)
        .map(|i| {
            vec![
                ColumnValue::I32(i),
                ColumnValue::Array(vec![
                    ColumnValue::F64(0.1),
                    ColumnValue::F64(0.2),
                    ColumnValue::F64(f64::from(i)),
                ]),
                ColumnValue::Str(format!("sample {}", i)),
            ]
        })
        .collect();

    let name = {
        let mut ctx = VaultContext::new(vault.clone()).unwrap();
        let (_, name) = ctx.new_dataset("typed", indeps, deps, None).unwrap();
        ctx.add(&rows).unwrap();
        name
    };

    let mut ctx = VaultContext::new(vault).unwrap();
    ctx.open(name.as_str()).unwrap();
    let dataset = ctx.current_dataset().unwrap().clone();
    assert_eq!(dataset.version(), [3, 0, 0]);
    assert_eq!(dataset.row_type(), "*(i*v[V]s)");
    assert_eq!(dataset.transpose_type().as_deref(), Some("(*i*2v[V]*s)"));

    let page = ctx.get(None, None, false, false).unwrap();
    assert_eq!(page.data, DataBlock::Rows(rows.clone()));

    let columns = ctx.get(None, Some(0), true, false).unwrap();
    match columns.data {
        DataBlock::Columns(cols) => {
            assert_eq!(cols.len(), 3);
            assert_eq!(cols[0], vec![ColumnValue::I32(0), ColumnValue::I32(1), ColumnValue::I32(2)]);
            assert_eq!(cols[2][1], ColumnValue::Str("sample 1".into()));
        }
        DataBlock::Rows(_) => panic!("transposed read returned rows"),
    }

    let err = ctx.get(None, Some(0), false, true).unwrap_err();
    assert!(matches!(err, VaultError::DataVersionMismatch { .. }));
}

#[test]
fn test_version_decides_the_backend() {
    let root = tempdir().unwrap();
    let mut ctx = VaultContext::new(store(root.path())).unwrap();
    for (format, version) in [
        (Format::LegacyCsv, [1, 0, 0]),
        (Format::Simple, [2, 0, 0]),
        (Format::Extended, [3, 0, 0]),
    ] {
        let (indeps, deps) = scalar_columns();
        let (_, name) = ctx
            .new_dataset(&format.to_string(), indeps, deps, Some(format))
            .unwrap();
        ctx.add(&float_rows(0..3)).unwrap();

        let mut reader = VaultContext::new(store(root.path())).unwrap();
        reader.open(name.as_str()).unwrap();
        let dataset = reader.current_dataset().unwrap();
        assert_eq!(dataset.version(), version);
        assert_eq!(dataset.format(), format);
        assert_eq!(dataset.row_type().starts_with("*2v"), format != Format::Extended);
        // Scalar floats read in simple mode from every format.
        assert_eq!(reader.get(None, None, false, true).unwrap().data.len(), 3);
    }
}

#[test]
fn test_tag_update_notifies_once() {
    let root = tempdir().unwrap();
    let (sink, mut rx) = ChannelSink::new();
    let store = Arc::new(SessionStore::new(VaultSettings::new(root.path()), Arc::new(sink)).unwrap());
    let mut ctx = VaultContext::new(store).unwrap();
    let (indeps, deps) = scalar_columns();
    let (_, name) = ctx.new_dataset("tagged", indeps, deps, None).unwrap();
    ctx.update_tags(&["old".into()], &[], &[name.clone()]).unwrap();
    while rx.try_recv().is_ok() {}

    let changed = ctx
        .update_tags(&["-old".into(), "new".into()], &[], &[name.clone()])
        .unwrap();
    assert!(changed);

    let (listener, event) = rx.try_recv().unwrap();
    assert_eq!(listener, ctx.id());
    match event {
        VaultEvent::TagsUpdated { datasets, .. } => {
            assert_eq!(datasets, vec![(name.clone(), vec!["new".to_string()])]);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(rx.try_recv().is_err());

    assert_eq!(ctx.dir(&["new".into()]).unwrap().1, vec![name.clone()]);
    assert!(ctx.dir(&["old".into()]).unwrap().1.is_empty());
    assert!(ctx.dir(&["-new".into()]).unwrap().1.is_empty());
}

#[test]
fn test_stored_version_is_checked_on_open() {
    use data_vault::vault_storage::container::{Container, VERSION_ATTR};
    use std::time::Duration;

    let root = tempdir().unwrap();
    let (indeps, deps) = scalar_columns();
    let data_file = {
        let session = store(root.path()).get(&VaultPath::root()).unwrap();
        let dataset = session
            .new_dataset("future", indeps, deps, Some(Format::Extended))
            .unwrap();
        dataset.add_data(&float_rows(0..4)).unwrap();
        session.dir().join("00001 - future.dvc")
    };
    let retag = |version: [u32; 3]| {
        let container = Container::open(&data_file, Duration::from_secs(60)).unwrap();
        container.set_attr(VERSION_ATTR, &version).unwrap();
    };

    retag([0, 3, 0]);
    let session = store(root.path()).get(&VaultPath::root()).unwrap();
    assert!(matches!(session.open_dataset(1u64), Err(VaultError::Unsupported(_))));
    let mut ctx = VaultContext::new(store(root.path())).unwrap();
    assert!(matches!(ctx.open(1u64), Err(VaultError::Unsupported(_))));

    retag([4, 0, 0]);
    let session = store(root.path()).get(&VaultPath::root()).unwrap();
    let dataset = session.open_dataset(1u64).unwrap();
    assert_eq!(dataset.format(), Format::Extended);
    assert_eq!(dataset.row_count().unwrap(), 4);
}

#[test]
fn test_streaming_reader_keeps_up_with_a_writer_thread() {
    const BATCHES: i32 = 200;
    let root = tempdir().unwrap();
    let (sink, mut rx) = ChannelSink::new();
    let store = Arc::new(SessionStore::new(VaultSettings::new(root.path()), Arc::new(sink)).unwrap());

    let mut writer = VaultContext::new(store.clone()).unwrap();
    let mut reader = VaultContext::new(store).unwrap();
    let (indeps, deps) = scalar_columns();
    let (_, name) = writer.new_dataset("live", indeps, deps, None).unwrap();
    reader.open(name.as_str()).unwrap();

    let handle = std::thread::spawn(move || {
        for i in 0..BATCHES {
            writer.add(&float_rows(i..i + 1)).unwrap();
        }
    });

    let mut seen = Vec::new();
    while seen.len() < BATCHES as usize {
        match reader.get(None, None, false, false).unwrap().data {
            DataBlock::Rows(rows) if !rows.is_empty() => seen.extend(rows),
            _ => {
                // Caught up: the reader is now registered and must be woken.
                let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
                loop {
                    match rx.try_recv() {
                        Ok((listener, VaultEvent::DataAvailable { .. })) => {
                            assert_eq!(listener, reader.id());
                            break;
                        }
                        Ok(_) => continue,
                        Err(_) if std::time::Instant::now() < deadline => {
                            std::thread::sleep(std::time::Duration::from_millis(1));
                        }
                        Err(_) => panic!("reader stranded at {} rows", seen.len()),
                    }
                }
            }
        }
    }
    handle.join().unwrap();
    assert_eq!(seen, float_rows(0..BATCHES));
}
