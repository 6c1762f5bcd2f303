use anyhow::{Context as _, Result};
use tfplugin_core::{PathStep, Schema, Value};
use tfplugin_sdk::convert::path_from_proto;
use tfplugin_test_util::proto::tfplugin6 as pb;
use tfplugin_test_util::values::{dynamic, ensure_no_errors, from_dynamic, object};

mod harness;

use harness::{configure, file_data_source_schema, file_schema, start, Client, FILE};

fn file_config(schema: &Schema, path: &str, content: &str) -> Value {
    object(
        &schema.implied_type(),
        [("path", Value::string(path)), ("content", Value::string(content))],
    )
}

/// What the host proposes for an update: the configuration plus prior values of computed attributes
fn proposed(prior: &Value, config: &Value) -> Value {
    let mut proposed = prior.as_object().cloned().unwrap_or_default();
    for (name, value) in config.as_object().into_iter().flatten() {
        if !value.is_null() {
            proposed.insert(name.clone(), value.clone());
        }
    }
    Value::Object(proposed)
}

struct Plan {
    planned_state: Value,
    requires_replace: Vec<String>,
}

async fn plan(client: &mut Client, prior: &Value, config: &Value) -> Result<Plan> {
    let schema = file_schema();
    let proposed_new_state = if config.is_null() {
        Value::Null
    } else if prior.is_null() {
        config.clone()
    } else {
        proposed(prior, config)
    };
    let response = client
        .plan_resource_change(pb::plan_resource_change::Request {
            type_name: FILE.to_string(),
            prior_state: Some(dynamic(prior, &schema)?),
            proposed_new_state: Some(dynamic(&proposed_new_state, &schema)?),
            config: Some(dynamic(config, &schema)?),
            prior_private: Vec::new(),
            provider_meta: None,
        })
        .await
        .context("failed to call PlanResourceChange")?
        .into_inner();
    ensure_no_errors(&response.diagnostics)?;
    let requires_replace = response
        .requires_replace
        .iter()
        .map(path_from_proto)
        .map(|path| match path.steps() {
            [PathStep::Attribute(name)] => name.clone(),
            other => format!("{other:?}"),
        })
        .collect();
    Ok(Plan {
        planned_state: from_dynamic(response.planned_state.as_ref(), &schema)?,
        requires_replace,
    })
}

async fn apply(
    client: &mut Client,
    prior: &Value,
    planned: &Value,
    config: &Value,
) -> Result<Value> {
    let schema = file_schema();
    let response = client
        .apply_resource_change(pb::apply_resource_change::Request {
            type_name: FILE.to_string(),
            prior_state: Some(dynamic(prior, &schema)?),
            planned_state: Some(dynamic(planned, &schema)?),
            config: Some(dynamic(config, &schema)?),
            planned_private: Vec::new(),
            provider_meta: None,
        })
        .await
        .context("failed to call ApplyResourceChange")?
        .into_inner();
    ensure_no_errors(&response.diagnostics)?;
    from_dynamic(response.new_state.as_ref(), &schema)
}

async fn read(client: &mut Client, state: &Value) -> Result<Value> {
    let schema = file_schema();
    let response = client
        .read_resource(pb::read_resource::Request {
            type_name: FILE.to_string(),
            current_state: Some(dynamic(state, &schema)?),
            private: Vec::new(),
            provider_meta: None,
        })
        .await
        .context("failed to call ReadResource")?
        .into_inner();
    ensure_no_errors(&response.diagnostics)?;
    from_dynamic(response.new_state.as_ref(), &schema)
}

fn attr<'a>(value: &'a Value, name: &str) -> &'a Value {
    value.get_attr(name).unwrap_or(&Value::Null)
}

#[test_log::test(tokio::test)]
async fn file_lifecycle_through_grpc() -> Result<()> {
    let root = tempfile::tempdir()?;
    let plugin = start().await?;
    let mut client = plugin.provider_client().await?;
    configure(&mut client, root.path()).await?;
    let schema = file_schema();

    let config = file_config(&schema, "notes/todo.txt", "write tests");
    let validated = client
        .validate_resource_config(pb::validate_resource_config::Request {
            type_name: FILE.to_string(),
            config: Some(dynamic(&config, &schema)?),
        })
        .await?
        .into_inner();
    ensure_no_errors(&validated.diagnostics)?;

    // create
    let planned = plan(&mut client, &Value::Null, &config).await?;
    assert_eq!(attr(&planned.planned_state, "file_permission"), &Value::string("0644"));
    assert_eq!(attr(&planned.planned_state, "content_sha256"), &Value::Unknown);
    let created = apply(&mut client, &Value::Null, &planned.planned_state, &config).await?;
    assert_eq!(attr(&created, "id"), &Value::string("notes/todo.txt"));
    assert_eq!(
        std::fs::read_to_string(root.path().join("notes/todo.txt"))?,
        "write tests"
    );
    assert!(attr(&created, "content_sha256").as_str().is_some());

    // refresh
    let refreshed = read(&mut client, &created).await?;
    assert_eq!(refreshed, created);
    let unchanged = plan(&mut client, &refreshed, &config).await?;
    assert_eq!(unchanged.planned_state, refreshed);

    // in-place update
    let config = file_config(&schema, "notes/todo.txt", "tests written");
    let planned = plan(&mut client, &refreshed, &config).await?;
    assert!(planned.requires_replace.is_empty());
    assert_eq!(attr(&planned.planned_state, "content_sha256"), &Value::Unknown);
    let updated = apply(&mut client, &refreshed, &planned.planned_state, &config).await?;
    assert_eq!(
        std::fs::read_to_string(root.path().join("notes/todo.txt"))?,
        "tests written"
    );
    assert_ne!(attr(&updated, "content_sha256"), attr(&created, "content_sha256"));

    // moving the file requires replacement
    let moved = file_config(&schema, "notes/done.txt", "tests written");
    let planned = plan(&mut client, &updated, &moved).await?;
    assert_eq!(planned.requires_replace, ["path"]);

    // destroy
    let planned = plan(&mut client, &updated, &Value::Null).await?;
    assert!(planned.planned_state.is_null());
    let destroyed = apply(&mut client, &updated, &Value::Null, &Value::Null).await?;
    assert!(destroyed.is_null());
    assert!(!root.path().join("notes/todo.txt").exists());

    // a file deleted behind the provider's back is gone from state
    let gone = read(&mut client, &updated).await?;
    assert!(gone.is_null());

    let status = plugin.shutdown().await?;
    assert!(status.success());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn import_and_data_source() -> Result<()> {
    let root = tempfile::tempdir()?;
    std::fs::write(root.path().join("existing.txt"), "hello")?;
    let plugin = start().await?;
    let mut client = plugin.provider_client().await?;
    configure(&mut client, root.path()).await?;

    let imported = client
        .import_resource_state(pb::import_resource_state::Request {
            type_name: FILE.to_string(),
            id: "existing.txt".to_string(),
        })
        .await?
        .into_inner();
    ensure_no_errors(&imported.diagnostics)?;
    assert_eq!(imported.imported_resources.len(), 1);
    let state = from_dynamic(imported.imported_resources[0].state.as_ref(), &file_schema())?;
    assert_eq!(attr(&state, "content"), &Value::string("hello"));
    assert_eq!(attr(&state, "path"), &Value::string("existing.txt"));

    let missing = client
        .import_resource_state(pb::import_resource_state::Request {
            type_name: FILE.to_string(),
            id: "missing.txt".to_string(),
        })
        .await?
        .into_inner();
    assert!(missing.imported_resources.is_empty());
    assert!(ensure_no_errors(&missing.diagnostics).is_err());

    let schema = file_data_source_schema();
    let config = object(
        &schema.implied_type(),
        [("path", Value::string("existing.txt"))],
    );
    let read = client
        .read_data_source(pb::read_data_source::Request {
            type_name: FILE.to_string(),
            config: Some(dynamic(&config, &schema)?),
            provider_meta: None,
        })
        .await?
        .into_inner();
    ensure_no_errors(&read.diagnostics)?;
    let state = from_dynamic(read.state.as_ref(), &schema)?;
    assert_eq!(attr(&state, "content"), &Value::string("hello"));
    assert_eq!(attr(&state, "id"), &Value::string("existing.txt"));

    let status = plugin.shutdown().await?;
    assert!(status.success());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn paths_outside_root_are_rejected() -> Result<()> {
    let root = tempfile::tempdir()?;
    let plugin = start().await?;
    let mut client = plugin.provider_client().await?;
    configure(&mut client, root.path()).await?;

    let schema = file_schema();
    let config = file_config(&schema, "../escape.txt", "nope");
    let planned = plan(&mut client, &Value::Null, &config).await?;
    let err = apply(&mut client, &Value::Null, &planned.planned_state, &config)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not contained by root"), "{err:#}");
    assert!(!root.path().parent().unwrap().join("escape.txt").exists());

    let status = plugin.shutdown().await?;
    assert!(status.success());
    Ok(())
}
