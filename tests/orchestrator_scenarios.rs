//! End-to-end orchestrator scenarios driven by scripted collaborators.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use procurement_agent::agents::{
    Agents, Clarification, Clarifier, CsvFormatter, Discovery, FactorSpec, FactorResolver,
    FollowupQueryGenerator, ReportFormatter, SourceFetcher, SourceMerger, ValueRefiner,
};
use procurement_agent::api::{router, AppState, API_KEY_HEADER};
use procurement_agent::config::Config;
use procurement_agent::factors::{FactorDefinition, FactorValue, ProcessingType};
use procurement_agent::orchestrator::{Orchestrator, DISCOVERY_FAILED};
use procurement_agent::task::{Attribute, Item, Task, TaskError, TaskId, TaskState, TaskStore};

/// Scripted collaborators shared by every scenario.
#[derive(Default)]
struct Script {
    /// Queries the clarifier treats as ambiguous.
    ambiguous: Vec<&'static str>,
    suggested_factors: Vec<&'static str>,
    /// Raw items returned by discovery, as (name, [(factor, value)]).
    products: Vec<(&'static str, Vec<(&'static str, &'static str)>)>,
    /// Discovery blocks until notified when set.
    discovery_gate: Option<Arc<Notify>>,
    /// Product names whose source fetch finds nothing.
    no_source_for: Vec<&'static str>,
    /// Refinement of summarized factors fails.
    refine_fails: bool,
    /// The clarifier answers with a blank clarified query.
    blank_clarification: bool,
    clarifier_fails: bool,
    discovery_fails: bool,
    /// Product names whose follow-up query generation errors.
    queries_fail_for: Vec<&'static str>,
    /// Product names whose source fetch errors.
    fetch_fails_for: Vec<&'static str>,
    /// Product names whose merge errors.
    merge_fails_for: Vec<&'static str>,
    discovered_with: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl Clarifier for Script {
    async fn clarify(&self, query: &str) -> anyhow::Result<Clarification> {
        if self.clarifier_fails {
            anyhow::bail!("clarifier timed out");
        }
        if self.blank_clarification {
            return Ok(Clarification::clear(
                "  ",
                self.suggested_factors.iter().map(|f| f.to_string()).collect(),
            ));
        }
        if self.ambiguous.iter().any(|q| *q == query) {
            return Ok(Clarification::ask("Which category?"));
        }
        Ok(Clarification::clear(
            query,
            self.suggested_factors.iter().map(|f| f.to_string()).collect(),
        ))
    }
}

#[async_trait]
impl FactorResolver for Script {
    async fn resolve(&self, name: &str) -> anyhow::Result<FactorDefinition> {
        let processing = if name == "Pricing" {
            ProcessingType::SummarizeProse
        } else {
            ProcessingType::None
        };
        Ok(FactorDefinition {
            schema: serde_json::json!({"type": "string"}),
            processing,
            categories: None,
        })
    }
}

#[async_trait]
impl Discovery for Script {
    async fn discover(&self, _category: &str, factors: &[FactorSpec]) -> anyhow::Result<Vec<Item>> {
        self.discovered_with
            .lock()
            .unwrap()
            .push(factors.iter().map(|f| f.name.clone()).collect());
        if let Some(gate) = &self.discovery_gate {
            gate.notified().await;
        }
        if self.discovery_fails {
            anyhow::bail!("research task failed");
        }

        Ok(self
            .products
            .iter()
            .map(|(name, values)| {
                let mut item = Item::new(*name);
                for spec in factors {
                    let value = values
                        .iter()
                        .find(|(factor, _)| *factor == spec.name)
                        .map(|(_, v)| FactorValue::text(*v))
                        .unwrap_or_else(FactorValue::not_found);
                    item.attributes.push(
                        Attribute::new(spec.name.clone(), value)
                            .with_definition(spec.definition.clone()),
                    );
                }
                item
            })
            .collect())
    }
}

#[async_trait]
impl ValueRefiner for Script {
    async fn refine(
        &self,
        definition: &FactorDefinition,
        value: &FactorValue,
    ) -> anyhow::Result<FactorValue> {
        if definition.processing == ProcessingType::None {
            return Ok(value.clone());
        }
        if self.refine_fails {
            anyhow::bail!("model unavailable");
        }
        Ok(FactorValue::text(format!("{} (summarized)", value)))
    }
}

#[async_trait]
impl FollowupQueryGenerator for Script {
    async fn generate(&self, item: &Item, max_queries: usize) -> anyhow::Result<Vec<String>> {
        let name = item.display_name().unwrap_or_default();
        if self.queries_fail_for.iter().any(|n| *n == name) {
            anyhow::bail!("query model returned garbage");
        }
        Ok(vec![
            format!("official {} pricing", name),
            format!("{} feature list", name),
        ]
        .into_iter()
        .take(max_queries)
        .collect())
    }
}

#[async_trait]
impl SourceFetcher for Script {
    async fn fetch_top_source(&self, query: &str) -> anyhow::Result<Option<String>> {
        if self.no_source_for.iter().any(|name| query.contains(name)) {
            return Ok(None);
        }
        if self.fetch_fails_for.iter().any(|name| query.contains(name)) {
            anyhow::bail!("search quota exhausted");
        }
        Ok(Some(format!("Source page for '{}'", query)))
    }
}

#[async_trait]
impl SourceMerger for Script {
    async fn merge(&self, item: &Item, _source: &str) -> anyhow::Result<Item> {
        if let Some(name) = item.display_name() {
            if self.merge_fails_for.iter().any(|n| *n == name) {
                anyhow::bail!("merge reply was not JSON");
            }
        }
        let mut merged = item.clone();
        merged
            .attributes
            .push(Attribute::new("Support", "24/7 chat"));
        Ok(merged)
    }
}

fn agents(script: Script) -> (Agents, Arc<Script>) {
    let script = Arc::new(script);
    let agents = Agents {
        clarifier: script.clone(),
        resolver: script.clone(),
        discovery: script.clone(),
        refiner: script.clone(),
        queries: script.clone(),
        fetcher: script.clone(),
        merger: script.clone(),
        formatter: Arc::new(CsvFormatter),
        max_followup_queries: 3,
    };
    (agents, script)
}

struct BrokenFormatter;

impl ReportFormatter for BrokenFormatter {
    fn render(&self, _items: &[Item], _factors: &[String]) -> anyhow::Result<String> {
        anyhow::bail!("report template missing")
    }
}

fn orchestrator(script: Script) -> (Orchestrator, Arc<Script>) {
    let (agents, script) = agents(script);
    (
        Orchestrator::new(Arc::new(TaskStore::new()), Arc::new(agents)),
        script,
    )
}

fn crm_script() -> Script {
    Script {
        ambiguous: vec!["software"],
        suggested_factors: vec!["Pricing", "Open Source"],
        products: vec![
            ("Acme CRM", vec![("Pricing", "$25 per seat"), ("Open Source", "No")]),
            ("OpenCRM", vec![("Pricing", "Free"), ("Open Source", "Yes")]),
        ],
        ..Default::default()
    }
}

/// Poll until the task settles in a state matching `done` with no run in flight.
async fn wait_for(orch: &Orchestrator, id: TaskId, done: impl Fn(TaskState) -> bool) -> Task {
    for _ in 0..500 {
        if let Some(task) = orch.store().get(id).await {
            if done(task.state()) && !orch.store().is_running(id) {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never settled", id);
}

async fn wait_for_state(orch: &Orchestrator, id: TaskId, state: TaskState) -> Task {
    for _ in 0..500 {
        if let Some(task) = orch.store().get(id).await {
            if task.state() == state {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never reached {}", id, state);
}

fn settled(state: TaskState) -> bool {
    state.is_terminal() || state == TaskState::AwaitingClarification
}

fn assert_legal_history(task: &Task) {
    let states: Vec<TaskState> = task.transitions().iter().map(|t| t.state).collect();
    assert_eq!(states.first(), Some(&TaskState::Start));
    for pair in states.windows(2) {
        assert!(
            pair[0].can_transition_to(pair[1]),
            "illegal transition {} -> {}",
            pair[0],
            pair[1]
        );
    }
    assert_eq!(states.last(), Some(&task.state()));
}

#[tokio::test]
async fn scenario_a_unambiguous_query_completes() {
    let (orch, script) = orchestrator(crm_script());
    let id = orch.start("CRM software", vec![]).await.unwrap();
    let task = wait_for(&orch, id, settled).await;

    assert_eq!(task.state(), TaskState::Completed);
    assert_eq!(task.comparison_factors, vec!["Open Source", "Pricing"]);
    assert_eq!(task.items.len(), 2);
    assert!(task.error.is_none());
    assert_legal_history(&task);

    // Factors were normalized before discovery ran.
    let discovered_with = script.discovered_with.lock().unwrap().clone();
    assert_eq!(discovered_with, vec![vec!["Open Source".to_string(), "Pricing".to_string()]]);

    let status = orch.get_status(id).await.unwrap();
    assert_eq!(status.status.to_string(), "completed");
    assert_eq!(status.data["comparison_factors"], serde_json::json!(["Open Source", "Pricing"]));

    let csv = task.formatted_output.unwrap();
    let rows: Vec<&str> = csv.trim_end().split("\r\n").collect();
    assert_eq!(rows[0], "Name,Open Source,Pricing");
    assert_eq!(rows.len(), 3);
    assert!(rows[1].starts_with("Acme CRM,No,$25 per seat (summarized)"));
    assert!(status.data["result"]
        .as_str()
        .unwrap()
        .starts_with("data:text/csv;charset=utf-8,Name,"));
}

#[tokio::test]
async fn scenario_b_ambiguous_query_pauses_then_resumes() {
    let (orch, _script) = orchestrator(crm_script());
    let id = orch.start("software", vec![]).await.unwrap();

    let paused = wait_for(&orch, id, settled).await;
    assert_eq!(paused.state(), TaskState::AwaitingClarification);
    assert_eq!(paused.clarified_query, "Which category?");
    assert!(paused.items.is_empty());
    let status = orch.get_status(id).await.unwrap();
    assert_eq!(status.status.to_string(), "paused_for_clarification");
    assert_eq!(status.data["current_state"], "AWAITING_CLARIFICATION");

    tokio_test::assert_ok!(orch.resume(id, "CRM software").await);
    let task = wait_for(&orch, id, |s| s.is_terminal()).await;
    assert_eq!(task.state(), TaskState::Completed);
    assert_eq!(task.clarified_query, "CRM software");
    assert_eq!(task.items.len(), 2);
    assert_legal_history(&task);

    let states: Vec<TaskState> = task.transitions().iter().map(|t| t.state).collect();
    assert_eq!(
        &states[..4],
        &[
            TaskState::Start,
            TaskState::Clarifying,
            TaskState::AwaitingClarification,
            TaskState::Clarifying
        ]
    );
}

#[tokio::test]
async fn scenario_c_empty_discovery_fails() {
    let (orch, _script) = orchestrator(Script {
        suggested_factors: vec!["Pricing"],
        ..Default::default()
    });
    let id = orch.start("CRM software", vec![]).await.unwrap();
    let task = wait_for(&orch, id, settled).await;

    assert_eq!(task.state(), TaskState::Error);
    assert_eq!(task.error.as_deref(), Some(DISCOVERY_FAILED));
    assert!(task.items.is_empty());
    assert!(task.formatted_output.is_none());
    assert_legal_history(&task);

    let status = orch.get_status(id).await.unwrap();
    assert_eq!(status.status.to_string(), "failed");
    assert_eq!(status.data["error_message"], DISCOVERY_FAILED);
}

#[tokio::test]
async fn scenario_d_missing_source_keeps_item() {
    let (orch, _script) = orchestrator(Script {
        no_source_for: vec!["OpenCRM"],
        ..crm_script()
    });
    let id = orch.start("CRM software", vec![]).await.unwrap();
    let task = wait_for(&orch, id, settled).await;
    assert_eq!(task.state(), TaskState::Completed);
    assert_eq!(task.items.len(), 2);

    let acme = &task.items[0];
    assert_eq!(acme.display_name(), Some("Acme CRM"));
    assert_eq!(acme.attribute("Support").unwrap().value, FactorValue::text("24/7 chat"));

    let open = &task.items[1];
    assert_eq!(open.display_name(), Some("OpenCRM"));
    let names: Vec<&str> = open.attributes.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["Open Source", "Pricing"]);
    assert_eq!(open.attribute("Open Source").unwrap().value, FactorValue::text("Yes"));
    assert_eq!(
        open.attribute("Pricing").unwrap().value,
        FactorValue::text("Free (summarized)")
    );
}

#[tokio::test]
async fn scenario_e_resume_while_running_conflicts() {
    let gate = Arc::new(Notify::new());
    let (orch, _script) = orchestrator(Script {
        discovery_gate: Some(gate.clone()),
        ..crm_script()
    });
    let id = orch.start("CRM software", vec![]).await.unwrap();
    wait_for_state(&orch, id, TaskState::Extracting).await;

    let err = orch.resume(id, "ERP software").await.unwrap_err();
    assert_eq!(
        err,
        TaskError::Conflict {
            id,
            state: TaskState::Extracting
        }
    );
    let task = orch.store().get(id).await.unwrap();
    assert_eq!(task.state(), TaskState::Extracting);
    assert_eq!(task.clarified_query, "CRM software");

    gate.notify_one();
    let task = wait_for(&orch, id, settled).await;
    assert_eq!(task.state(), TaskState::Completed);
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let (orch, _script) = orchestrator(crm_script());
    let id = TaskId::new();
    assert_eq!(orch.get_status(id).await.unwrap_err(), TaskError::NotFound(id));
    assert_eq!(orch.resume(id, "CRM").await.unwrap_err(), TaskError::NotFound(id));
}

#[tokio::test]
async fn concurrent_resumes_run_once() {
    let (orch, _script) = orchestrator(crm_script());
    let id = orch.start("software", vec![]).await.unwrap();
    wait_for(&orch, id, settled).await;

    let (first, second) = tokio::join!(
        orch.resume(id, "CRM software"),
        orch.resume(id, "ERP software")
    );
    assert_eq!(
        [first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(),
        1
    );
    let err = first.err().or(second.err()).unwrap();
    assert!(matches!(
        err,
        TaskError::Conflict { .. } | TaskError::AlreadyRunning(_)
    ));

    let task = wait_for(&orch, id, |s| s.is_terminal()).await;
    assert_eq!(task.state(), TaskState::Completed);
    let resumes = task
        .transitions()
        .iter()
        .filter(|t| t.state == TaskState::Clarifying)
        .count();
    assert_eq!(resumes, 2);
}

#[tokio::test]
async fn preset_factors_are_kept_and_normalized() {
    let (orch, script) = orchestrator(crm_script());
    let id = orch
        .start(
            "CRM software",
            vec!["Pricing".into(), "Deployment Model".into(), "Pricing".into()],
        )
        .await
        .unwrap();
    let task = wait_for(&orch, id, settled).await;
    assert_eq!(task.comparison_factors, vec!["Deployment Model", "Pricing"]);
    assert_eq!(
        script.discovered_with.lock().unwrap()[0],
        vec!["Deployment Model".to_string(), "Pricing".to_string()]
    );
    assert_eq!(
        task.items[0].attribute("Deployment Model").unwrap().value,
        FactorValue::not_found()
    );
}

#[tokio::test]
async fn refinement_failures_degrade_per_value() {
    let (orch, _script) = orchestrator(Script {
        refine_fails: true,
        ..crm_script()
    });
    let id = orch.start("CRM software", vec![]).await.unwrap();
    let task = wait_for(&orch, id, settled).await;
    assert_eq!(task.state(), TaskState::Completed);
    assert_eq!(task.items.len(), 2);
    assert_eq!(
        task.items[0].attribute("Pricing").unwrap().value,
        FactorValue::text("$25 per seat")
    );
}

#[tokio::test]
async fn enrichment_failures_degrade_per_item() {
    let (orch, _script) = orchestrator(Script {
        products: vec![
            ("FetchErr", vec![("Pricing", "a")]),
            ("MergeErr", vec![("Pricing", "b")]),
            ("QueryErr", vec![("Pricing", "c")]),
            ("", vec![("Pricing", "d")]),
            ("Healthy", vec![("Pricing", "e")]),
        ],
        suggested_factors: vec!["Pricing"],
        fetch_fails_for: vec!["FetchErr"],
        merge_fails_for: vec!["MergeErr"],
        queries_fail_for: vec!["QueryErr"],
        ..Default::default()
    });
    let id = orch.start("CRM software", vec![]).await.unwrap();
    let task = wait_for(&orch, id, settled).await;
    assert_eq!(task.state(), TaskState::Completed);
    assert_legal_history(&task);

    let names: Vec<Option<&str>> = task.items.iter().map(|i| i.name.as_deref()).collect();
    assert_eq!(
        names,
        vec![Some("FetchErr"), Some("MergeErr"), Some("QueryErr"), Some(""), Some("Healthy")]
    );

    // Failed units keep exactly their processed attributes.
    for (item, raw) in task.items.iter().take(4).zip(["a", "b", "c", "d"]) {
        let attributes: Vec<(&str, String)> = item
            .attributes
            .iter()
            .map(|a| (a.name.as_str(), a.value.to_string()))
            .collect();
        assert_eq!(attributes, vec![("Pricing", format!("{} (summarized)", raw))]);
    }
    assert_eq!(
        task.items[4].attribute("Support").unwrap().value,
        FactorValue::text("24/7 chat")
    );

    let csv = task.formatted_output.unwrap();
    assert_eq!(csv.trim_end().split("\r\n").count(), 6);
}

#[tokio::test]
async fn clarifier_error_fails_task() {
    let (orch, _script) = orchestrator(Script {
        clarifier_fails: true,
        ..crm_script()
    });
    let id = orch.start("CRM software", vec![]).await.unwrap();
    let task = wait_for(&orch, id, settled).await;

    assert_eq!(task.state(), TaskState::Error);
    assert_eq!(task.error.as_deref(), Some("clarifier timed out"));
    assert!(task.items.is_empty());
    assert_legal_history(&task);
}

#[tokio::test]
async fn discovery_error_fails_task() {
    let (orch, _script) = orchestrator(Script {
        discovery_fails: true,
        ..crm_script()
    });
    let id = orch.start("CRM software", vec![]).await.unwrap();
    let task = wait_for(&orch, id, settled).await;

    assert_eq!(task.state(), TaskState::Error);
    assert_eq!(task.error.as_deref(), Some("research task failed"));
    assert!(task.items.is_empty());
    assert_legal_history(&task);

    let status = orch.get_status(id).await.unwrap();
    assert_eq!(status.status.to_string(), "failed");
    assert_eq!(status.data["error_message"], "research task failed");
}

#[tokio::test]
async fn formatter_error_fails_task_and_keeps_items() {
    let (mut agents, _script) = agents(crm_script());
    agents.formatter = Arc::new(BrokenFormatter);
    let orch = Orchestrator::new(Arc::new(TaskStore::new()), Arc::new(agents));

    let id = orch.start("CRM software", vec![]).await.unwrap();
    let task = wait_for(&orch, id, settled).await;

    assert_eq!(task.state(), TaskState::Error);
    assert_eq!(task.error.as_deref(), Some("report template missing"));
    assert!(task.formatted_output.is_none());
    assert_eq!(task.items.len(), 2);
    assert_eq!(task.items[0].display_name(), Some("Acme CRM"));
    assert_legal_history(&task);
}

#[tokio::test]
async fn blank_clarified_query_keeps_working_query() {
    let (orch, _script) = orchestrator(Script {
        blank_clarification: true,
        ..crm_script()
    });
    let id = orch.start("CRM software", vec![]).await.unwrap();
    let task = wait_for(&orch, id, settled).await;

    assert_eq!(task.state(), TaskState::Completed);
    assert_eq!(task.clarified_query, "CRM software");
}

#[tokio::test]
async fn completed_projection_has_no_metadata_and_is_stable() {
    let (orch, _script) = orchestrator(crm_script());
    let id = orch.start("CRM software", vec![]).await.unwrap();
    let task = wait_for(&orch, id, settled).await;
    assert!(task.items.iter().all(|item| !item.has_processing_metadata()));

    let first = orch.get_status(id).await.unwrap();
    let second = orch.get_status(id).await.unwrap();
    assert_eq!(first.data, second.data);

    let encoded = serde_json::to_string(&first.data).unwrap();
    assert!(!encoded.contains("processing"));
    assert!(!encoded.contains("schema"));
    for item in first.data["items"].as_array().unwrap() {
        for attribute in item["extracted_factors"].as_array().unwrap() {
            assert_eq!(
                attribute.as_object().unwrap().keys().collect::<Vec<_>>(),
                vec!["name", "value"]
            );
        }
    }
}

#[tokio::test]
async fn http_flow_with_clarification() {
    let (agents, _script) = agents(crm_script());
    let mut config = Config::default();
    config.auth.api_key = Some("secret".to_string());
    let state = Arc::new(AppState::with_agents(config, agents));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let app = router(Arc::clone(&state));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::new();
    let started: serde_json::Value = client
        .post(format!("{}/analyze", base))
        .header(API_KEY_HEADER, "secret")
        .json(&serde_json::json!({"query": "software"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let task_id = started["task_id"].as_str().unwrap().to_string();

    let status = poll_status(&client, &base, &task_id, "paused_for_clarification").await;
    assert_eq!(status["data"]["clarified_query"], "Which category?");

    let resp = client
        .post(format!("{}/tasks/{}/clarify", base, task_id))
        .header(API_KEY_HEADER, "secret")
        .json(&serde_json::json!({"query": "CRM software"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let status = poll_status(&client, &base, &task_id, "completed").await;
    assert_eq!(status["data"]["current_state"], "COMPLETED");
    assert_eq!(status["data"]["items"].as_array().unwrap().len(), 2);

    let resp = client
        .post(format!("{}/tasks/{}/clarify", base, task_id))
        .header(API_KEY_HEADER, "secret")
        .json(&serde_json::json!({"clarification": "ERP software"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::CONFLICT);

    let tasks: serde_json::Value = client
        .get(format!("{}/tasks", base))
        .header(API_KEY_HEADER, "secret")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(tasks.as_array().unwrap().len(), 1);
    assert_eq!(tasks[0]["status"], "completed");
}

async fn poll_status(
    client: &reqwest::Client,
    base: &str,
    task_id: &str,
    want: &str,
) -> serde_json::Value {
    for _ in 0..500 {
        let status: serde_json::Value = client
            .get(format!("{}/status/{}", base, task_id))
            .header(API_KEY_HEADER, "secret")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if status["status"] == want {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never reached {}", task_id, want);
}
