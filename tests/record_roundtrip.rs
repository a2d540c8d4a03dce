use anyhow::Result;
use recordlite::{
    Database, Error, EvalContext, Field, FieldGroup, GroupParts, ModelDef, Operand, Query,
    QueryOperator, SelectOptions, Value,
};

// Opt-in statement logging for debugging test failures
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

// Helper function to create an in-memory database with a single-field
// counter model
fn create_counter_db() -> Result<Database> {
    init_tracing();
    let mut db = Database::open_in_memory()?;
    db.register(ModelDef::new("Counter").with_field("num", Field::integer()))?;
    db.init()?;
    Ok(db)
}

// Helper function for a model exercising every field variant
fn create_sample_db() -> Result<Database> {
    let mut db = Database::open_in_memory()?;
    db.register(
        ModelDef::new("Sample")
            .with_field("word", Field::string(64))
            .with_field("ratio", Field::float())
            .with_field("flag", Field::boolean())
            .with_field("body", Field::blob())
            .with_field("state", Field::choice(["new", "running", "done"]))
            .with_field("created", Field::datetime().auto_now_add()),
    )?;
    db.init()?;
    Ok(db)
}

#[tokio::test]
async fn test_integer_roundtrip() {
    test_integer_roundtrip_impl().unwrap();
}

fn test_integer_roundtrip_impl() -> Result<()> {
    let db = create_counter_db()?;

    let mut rec = db.new_record("Counter", &[("num", Value::from(123))])?;
    assert!(rec.rowid().is_none());
    assert!(rec.is_dirty());

    db.save(&mut rec)?;
    let id = rec.rowid().expect("first save assigns an identity");
    assert!(id > 0);
    assert!(!rec.is_dirty());
    assert_eq!(rec.get("num")?, Value::Integer(123));

    let loaded = db
        .objects("Counter")?
        .get(&Query::new().with_eq("rowid", id))?
        .expect("row exists");
    assert_eq!(loaded.get("num")?, Value::Integer(123));
    assert!(!loaded.is_dirty());
    Ok(())
}

#[tokio::test]
async fn test_identity_is_stable_across_saves() {
    test_identity_is_stable_across_saves_impl().unwrap();
}

fn test_identity_is_stable_across_saves_impl() -> Result<()> {
    let db = create_counter_db()?;

    let mut rec = db.new_record("Counter", &[("num", Value::from(1))])?;
    db.save(&mut rec)?;
    let id = rec.rowid().unwrap();

    rec.set("num", 2)?;
    assert!(rec.is_dirty());
    let affected = db.save(&mut rec)?;
    assert_eq!(affected, 1);
    assert_eq!(rec.rowid(), Some(id));

    // Updates do not create new rows.
    assert_eq!(db.objects("Counter")?.all()?.len(), 1);
    let loaded = db.objects("Counter")?.get(&Query::new().with_eq("rowid", id))?.unwrap();
    assert_eq!(loaded.get("num")?, Value::Integer(2));
    Ok(())
}

#[tokio::test]
async fn test_unique_violation_fails_second_save() {
    test_unique_violation_fails_second_save_impl().unwrap();
}

fn test_unique_violation_fails_second_save_impl() -> Result<()> {
    let mut db = Database::open_in_memory()?;
    db.register(ModelDef::new("Entry").with_field("word", Field::string(32).unique()))?;
    db.init()?;

    let mut first = db.new_record("Entry", &[("word", Value::from("abc"))])?;
    db.save(&mut first)?;

    let mut second = db.new_record("Entry", &[("word", Value::from("abc"))])?;
    assert!(db.save(&mut second).is_err());
    // The failed save leaves the instance dirty.
    assert!(second.is_dirty());
    Ok(())
}

#[tokio::test]
async fn test_field_variant_roundtrips() {
    test_field_variant_roundtrips_impl().unwrap();
}

fn test_field_variant_roundtrips_impl() -> Result<()> {
    let db = create_sample_db()?;

    let mut rec = db.new_record(
        "Sample",
        &[
            ("word", Value::from("  spaced  ")),
            ("ratio", Value::from(2.5)),
            ("flag", Value::Integer(1)),
            ("body", Value::Blob(vec![0xDE, 0xAD, 0xBE, 0xEF])),
            ("state", Value::from("running")),
        ],
    )?;
    db.save(&mut rec)?;
    let id = rec.rowid().unwrap();

    let loaded = db
        .objects("Sample")?
        .get(&Query::new().with_eq("rowid", id))?
        .unwrap();
    // Strings are stripped of surrounding whitespace on save.
    assert_eq!(loaded.get("word")?, Value::Text("spaced".into()));
    assert_eq!(loaded.get("ratio")?, Value::Real(2.5));
    // Truthy input normalizes to a boolean backed by 0/1.
    assert_eq!(loaded.get("flag")?, Value::Boolean(true));
    assert_eq!(loaded.get("body")?, Value::Blob(vec![0xDE, 0xAD, 0xBE, 0xEF]));
    assert_eq!(loaded.get("state")?, Value::Text("running".into()));
    // auto_now_add stamped the insert.
    assert!(loaded.get("created")?.as_integer().unwrap() > 0);
    Ok(())
}

#[tokio::test]
async fn test_choice_rejects_unknown_option() {
    test_choice_rejects_unknown_option_impl().unwrap();
}

fn test_choice_rejects_unknown_option_impl() -> Result<()> {
    let db = create_sample_db()?;
    let mut rec = db.new_record("Sample", &[])?;
    // Default is the first option.
    assert_eq!(rec.get("state")?, Value::Text("new".into()));
    assert!(rec.set("state", "nope").is_err());
    Ok(())
}

#[tokio::test]
async fn test_null_criteria_render_is_null() {
    test_null_criteria_render_is_null_impl().unwrap();
}

fn test_null_criteria_render_is_null_impl() -> Result<()> {
    let mut db = Database::open_in_memory()?;
    db.register(
        ModelDef::new("Slot")
            .with_field("num", Field::integer().with_default(Value::Null)),
    )?;
    db.init()?;

    let mut empty = db.new_record("Slot", &[])?;
    db.save(&mut empty)?;
    let mut filled = db.new_record("Slot", &[("num", Value::from(5))])?;
    db.save(&mut filled)?;

    let nulls = db
        .objects("Slot")?
        .filter(&Query::new().with_eq("num", Value::Null))?;
    assert_eq!(nulls.len(), 1);
    assert_eq!(nulls[0].rowid(), empty.rowid());

    let filled_rows = db
        .objects("Slot")?
        .filter(&Query::new().with_condition("num", QueryOperator::NotEqual(Value::Null)))?;
    assert_eq!(filled_rows.len(), 1);
    assert_eq!(filled_rows[0].rowid(), filled.rowid());
    Ok(())
}

#[tokio::test]
async fn test_order_by_and_limit() {
    test_order_by_and_limit_impl().unwrap();
}

fn test_order_by_and_limit_impl() -> Result<()> {
    let db = create_counter_db()?;
    for n in [1i64, 5, 3] {
        let mut rec = db.new_record("Counter", &[("num", Value::from(n))])?;
        db.save(&mut rec)?;
    }

    let rows = db.objects("Counter")?.select(
        &Query::new(),
        &SelectOptions::new().with_order("-num").with_limit(0, 2),
    )?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("num")?, Value::Integer(5));
    assert_eq!(rows[1].get("num")?, Value::Integer(3));

    let offset = db.objects("Counter")?.select(
        &Query::new(),
        &SelectOptions::new().with_order("num").with_limit(1, 2),
    )?;
    assert_eq!(offset.len(), 2);
    assert_eq!(offset[0].get("num")?, Value::Integer(3));
    Ok(())
}

#[tokio::test]
async fn test_unknown_keywords_are_rejected() {
    test_unknown_keywords_are_rejected_impl().unwrap();
}

fn test_unknown_keywords_are_rejected_impl() -> Result<()> {
    let db = create_counter_db()?;

    let err = db
        .objects("Counter")?
        .filter(&Query::new().with_eq("nope", 1))
        .unwrap_err();
    match err {
        Error::UnknownFields { given, .. } => assert_eq!(given, vec!["nope".to_string()]),
        other => panic!("expected UnknownFields, got {other:?}"),
    }

    let err = db
        .objects("Counter")?
        .select(&Query::new(), &SelectOptions::new().with_order("-nope"))
        .unwrap_err();
    assert!(matches!(err, Error::UnknownFields { .. }));

    assert!(db.new_record("Counter", &[("nope", Value::from(1))]).is_err());
    Ok(())
}

#[tokio::test]
async fn test_get_one_exists_exclude() {
    test_get_one_exists_exclude_impl().unwrap();
}

fn test_get_one_exists_exclude_impl() -> Result<()> {
    let db = create_counter_db()?;
    for n in [7i64, 7, 9] {
        let mut rec = db.new_record("Counter", &[("num", Value::from(n))])?;
        db.save(&mut rec)?;
    }
    let manager = db.objects("Counter")?;

    // More than one match is an error for get...
    assert!(matches!(
        manager.get(&Query::new().with_eq("num", 7)),
        Err(Error::Ambiguous { .. })
    ));
    // ...and collapses to absent for one.
    assert!(manager.one(&Query::new().with_eq("num", 7)).is_none());

    assert!(manager.exists(&Query::new().with_eq("num", 9)));
    assert!(!manager.exists(&Query::new().with_eq("num", 11)));

    let excluded = manager.exclude(&Query::new().with_eq("num", 7))?;
    assert_eq!(excluded.len(), 1);
    assert_eq!(excluded[0].get("num")?, Value::Integer(9));
    Ok(())
}

#[tokio::test]
async fn test_create_or_get() {
    test_create_or_get_impl().unwrap();
}

fn test_create_or_get_impl() -> Result<()> {
    let mut db = Database::open_in_memory()?;
    db.register(
        ModelDef::new("Entry")
            .with_field("word", Field::string(32).unique())
            .with_field("num", Field::integer()),
    )?;
    db.init()?;

    let first = db
        .objects("Entry")?
        .create_or_get(&[("word", Value::from("abc")), ("num", Value::from(1))])?;
    assert!(first.rowid().is_some());

    // Looked up by the unique subset; no second row appears.
    let again = db
        .objects("Entry")?
        .create_or_get(&[("word", Value::from("abc")), ("num", Value::from(2))])?;
    assert_eq!(again.rowid(), first.rowid());
    assert_eq!(again.get("num")?, Value::Integer(1));
    assert_eq!(db.objects("Entry")?.all()?.len(), 1);

    // No unique criterion at all is a query error.
    assert!(matches!(
        db.objects("Entry")?.create_or_get(&[("num", Value::from(3))]),
        Err(Error::Query(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_delete_and_nth() {
    test_delete_and_nth_impl().unwrap();
}

fn test_delete_and_nth_impl() -> Result<()> {
    let db = create_counter_db()?;
    let mut kept = db.new_record("Counter", &[("num", Value::from(1))])?;
    db.save(&mut kept)?;
    let mut gone = db.new_record("Counter", &[("num", Value::from(2))])?;
    db.save(&mut gone)?;

    assert_eq!(db.objects("Counter")?.nth(1)?.unwrap().get("num")?, Value::Integer(2));

    db.delete(&gone)?;
    let rows = db.objects("Counter")?.all()?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].rowid(), kept.rowid());

    let unsaved = db.new_record("Counter", &[])?;
    assert!(db.delete(&unsaved).is_err());
    Ok(())
}

#[tokio::test]
async fn test_required_field_vetoes_save() {
    test_required_field_vetoes_save_impl().unwrap();
}

fn test_required_field_vetoes_save_impl() -> Result<()> {
    let mut db = Database::open_in_memory()?;
    db.register(
        ModelDef::new("Entry").with_field(
            "word",
            Field::string(32).required().with_default(Value::Null),
        ),
    )?;
    db.init()?;

    let mut rec = db.new_record("Entry", &[])?;
    match db.save(&mut rec) {
        Err(Error::Hook { phase, field, .. }) => {
            assert_eq!(phase, "pre_save");
            assert_eq!(field, "word");
        }
        other => panic!("expected a pre_save failure, got {other:?}"),
    }
    assert!(rec.is_dirty());

    rec.set("word", "filled")?;
    db.save(&mut rec)?;
    Ok(())
}

#[tokio::test]
async fn test_group_fan_out_and_reconstruction() {
    test_group_fan_out_and_reconstruction_impl().unwrap();
}

fn test_group_fan_out_and_reconstruction_impl() -> Result<()> {
    let mut db = Database::open_in_memory()?;
    let pos = FieldGroup::new()
        .with_field("xx", Field::integer())
        .with_field("yy", Field::integer());
    db.register(
        ModelDef::new("Sprite")
            .with_field("name", Field::string(16))
            .with_group("pos", pos),
    )?;
    db.init()?;

    let mut parts = GroupParts::new();
    parts.insert("xx".to_string(), Value::Integer(3));
    parts.insert("yy".to_string(), Value::Integer(4));

    let mut rec = db.new_record("Sprite", &[("name", Value::from("dot"))])?;
    rec.set_group("pos", &parts)?;
    db.save(&mut rec)?;

    let loaded = db
        .objects("Sprite")?
        .get(&Query::new().with_eq("pos__xx", 3))?
        .unwrap();
    assert_eq!(loaded.get_group("pos")?, parts);

    // Partial or unknown keys are rejected as a unit.
    let mut bad = GroupParts::new();
    bad.insert("xx".to_string(), Value::Integer(1));
    assert!(rec.set_group("pos", &bad).is_err());
    Ok(())
}

#[tokio::test]
async fn test_file_backed_persistence() {
    test_file_backed_persistence_impl().unwrap();
}

fn test_file_backed_persistence_impl() -> Result<()> {
    let temp_file = tempfile::NamedTempFile::new()?;
    let path = temp_file.path();

    {
        let mut db = Database::open(path)?;
        db.register(ModelDef::new("Counter").with_field("num", Field::integer()))?;
        db.init()?;
        let mut rec = db.new_record("Counter", &[("num", Value::from(42))])?;
        db.save(&mut rec)?;
        db.close()?;
    }

    // Re-opening skips creation for the existing table and sees the row.
    let mut db = Database::open(path)?;
    db.register(ModelDef::new("Counter").with_field("num", Field::integer()))?;
    db.init()?;
    let rows = db.objects("Counter")?.all()?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("num")?, Value::Integer(42));
    Ok(())
}

#[tokio::test]
async fn test_registration_is_closed_after_init() {
    test_registration_is_closed_after_init_impl().unwrap();
}

fn test_registration_is_closed_after_init_impl() -> Result<()> {
    let mut db = create_counter_db()?;
    assert!(db
        .register(ModelDef::new("Late").with_field("num", Field::integer()))
        .is_err());

    // reset() reopens registration on the same connection.
    db.reset();
    assert_eq!(db.statement_count(), 0);
    db.register(ModelDef::new("Late").with_field("num", Field::integer()))?;
    db.init()?;
    Ok(())
}

#[tokio::test]
async fn test_expressions_over_record_fields() {
    test_expressions_over_record_fields_impl().unwrap();
}

fn test_expressions_over_record_fields_impl() -> Result<()> {
    let db = create_counter_db()?;
    let mut rec = db.new_record("Counter", &[("num", Value::from(40))])?;
    db.save(&mut rec)?;

    // Field operands read the bound record's current value.
    let e = recordlite::expr::add(Operand::field("num"), Operand::name("bump"));
    let ctx = EvalContext::new().with_record(&rec).with_value("bump", 2);
    assert_eq!(e.eval(&ctx).value(), Some(Value::Integer(42)));
    assert_eq!(e.render(&ctx), "counter.num + bump");

    // Without the record bound the tree stays partial.
    let partial = match e.eval(&EvalContext::new().with_value("bump", 2)) {
        recordlite::Evaluated::Partial(p) => p,
        other => panic!("expected partial, got {other:?}"),
    };
    assert_eq!(
        partial.eval(&EvalContext::new().with_record(&rec)).value(),
        Some(Value::Integer(42))
    );
    Ok(())
}

#[tokio::test]
async fn test_zero_column_model_is_fatal() {
    test_zero_column_model_is_fatal_impl().unwrap();
}

fn test_zero_column_model_is_fatal_impl() -> Result<()> {
    let mut db = Database::open_in_memory()?;
    // Only a virtual field: nothing persistable, so no table can exist.
    db.register(ModelDef::new("Ghost").with_field("items", Field::many_to_many("Ghost")))?;
    assert!(matches!(db.init(), Err(Error::Schema(_))));
    Ok(())
}
