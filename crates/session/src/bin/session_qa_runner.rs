use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Value, json};
use snafu::{OptionExt, Snafu};

use tangent_chat::{Chat, CompletionParams, Message, Response, Role};
use tangent_llm::{
    BoxFuture, CompletionProvider, ProviderResult, ProviderStreamHandle, ProviderWorker,
    StreamEvent, make_event_stream,
};
use tangent_session::{
    KEY_MODEL, KEY_STREAM, SettingsStore, SubmissionEvent, SubmissionPipeline, apply_response,
};

#[derive(Debug, Clone)]
struct RunnerArgs {
    scenario: Scenario,
    config_path: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Scenario {
    TreeNavigation,
    ForkEditing,
    PayloadEmission,
    StreamFold,
    SettingsRoundtrip,
    SubmissionCycle,
    All,
}

impl Scenario {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "tree_navigation" => Some(Self::TreeNavigation),
            "fork_editing" => Some(Self::ForkEditing),
            "payload_emission" => Some(Self::PayloadEmission),
            "stream_fold" => Some(Self::StreamFold),
            "settings_roundtrip" => Some(Self::SettingsRoundtrip),
            "submission_cycle" => Some(Self::SubmissionCycle),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::TreeNavigation => "tree_navigation",
            Self::ForkEditing => "fork_editing",
            Self::PayloadEmission => "payload_emission",
            Self::StreamFold => "stream_fold",
            Self::SettingsRoundtrip => "settings_roundtrip",
            Self::SubmissionCycle => "submission_cycle",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Snafu)]
enum RunnerError {
    #[snafu(display("missing required --scenario argument"))]
    MissingScenario { stage: &'static str },
    #[snafu(display("missing value for argument '{arg}'"))]
    MissingArgumentValue {
        stage: &'static str,
        arg: &'static str,
    },
    #[snafu(display("unknown scenario '{raw}'"))]
    UnknownScenario { stage: &'static str, raw: String },
    #[snafu(display("unknown argument '{raw}'"))]
    UnknownArgument { stage: &'static str, raw: String },
    #[snafu(display("scenario '{scenario}' failed: {reason}"))]
    ScenarioFailed {
        stage: &'static str,
        scenario: &'static str,
        reason: String,
    },
}

type RunnerResult<T> = Result<T, RunnerError>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt().with_target(false).init();
    if let Err(error) = run().await {
        println!("runner_ok=false");
        eprintln!("runner_error={error}");
        std::process::exit(1);
    }
}

async fn run() -> RunnerResult<()> {
    let args = parse_args(env::args().skip(1))?;
    println!("scenario={}", args.scenario.name());

    match args.scenario {
        Scenario::TreeNavigation => run_tree_navigation(),
        Scenario::ForkEditing => run_fork_editing(),
        Scenario::PayloadEmission => run_payload_emission(),
        Scenario::StreamFold => run_stream_fold(),
        Scenario::SettingsRoundtrip => run_settings_roundtrip(args.config_path.as_deref()),
        Scenario::SubmissionCycle => run_submission_cycle().await,
        Scenario::All => run_all(args.config_path.as_deref()).await,
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> RunnerResult<RunnerArgs> {
    let mut scenario = None;
    let mut config_path = None;
    let mut pending = args.into_iter();

    while let Some(argument) = pending.next() {
        match argument.as_str() {
            "--scenario" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-scenario-value",
                    arg: "--scenario",
                })?;
                let parsed = Scenario::parse(&value).context(UnknownScenarioSnafu {
                    stage: "parse-args-scenario",
                    raw: value,
                })?;
                scenario = Some(parsed);
            }
            "--config" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-config-value",
                    arg: "--config",
                })?;
                config_path = Some(value);
            }
            _ => {
                return UnknownArgumentSnafu {
                    stage: "parse-args",
                    raw: argument,
                }
                .fail();
            }
        }
    }

    Ok(RunnerArgs {
        scenario: scenario.context(MissingScenarioSnafu {
            stage: "parse-args-scenario-required",
        })?,
        config_path,
    })
}

async fn run_all(config_path: Option<&str>) -> RunnerResult<()> {
    run_tree_navigation()?;
    run_fork_editing()?;
    run_payload_emission()?;
    run_stream_fold()?;
    run_settings_roundtrip(config_path)?;
    run_submission_cycle().await?;
    println!("all_passed=true");
    Ok(())
}

fn ensure_scenario(
    scenario: &'static str,
    check: &'static str,
    condition: bool,
) -> RunnerResult<()> {
    println!("{check}={condition}");
    if condition {
        Ok(())
    } else {
        ScenarioFailedSnafu {
            stage: "scenario-check",
            scenario,
            reason: format!("check '{check}' did not hold"),
        }
        .fail()
    }
}

fn answered_turn(chat: &mut Chat, prompt: &str, reply: &str) {
    let current = chat.current();
    chat.entry_mut(current).set_prompt_role(Role::User);
    chat.entry_mut(current).set_prompt_content(prompt);
    apply_response(chat, response_with(reply));
}

fn response_with(content: &str) -> Response {
    Response::from_api_response(&json!({
        "id": "chatcmpl-qa",
        "created": 1_700_000_000,
        "model": "gpt-qa",
        "object": "chat.completion",
        "choices": [{"message": {"role": "assistant", "content": content}}],
    }))
    .unwrap_or_default()
}

fn run_tree_navigation() -> RunnerResult<()> {
    let scenario = "tree_navigation";
    let mut chat = Chat::new();
    ensure_scenario(scenario, "fresh_chat_is_default", chat.is_default())?;

    answered_turn(&mut chat, "one", "answer-one");
    answered_turn(&mut chat, "two", "answer-two");
    answered_turn(&mut chat, "three", "answer-three");
    ensure_scenario(scenario, "path_spans_all_turns", chat.path().len() == 4)?;

    // up walks toward the first turn and stops there
    let before_top = chat.cursor();
    chat.up();
    chat.up();
    chat.up();
    ensure_scenario(
        scenario,
        "up_moved_the_cursor",
        chat.cursor() != before_top,
    )?;
    chat.top();
    let top = chat.cursor();
    chat.up();
    ensure_scenario(scenario, "up_stops_at_the_first_turn", chat.cursor() == top)?;
    ensure_scenario(
        scenario,
        "top_is_the_first_prompt",
        chat.cursor_entry().prompt().content == "one",
    )?;

    chat.bottom();
    ensure_scenario(
        scenario,
        "bottom_returns_to_the_newest_entry",
        chat.cursor() == chat.current(),
    )?;

    chat.up();
    chat.return_to_current();
    ensure_scenario(
        scenario,
        "return_to_current_snaps_back",
        chat.cursor() == chat.current(),
    )?;

    println!("runner_ok=true");
    Ok(())
}

fn run_fork_editing() -> RunnerResult<()> {
    let scenario = "fork_editing";
    let mut chat = Chat::new();
    answered_turn(&mut chat, "original", "answer");
    let answered = chat.path()[0];
    let draft = chat.current();

    // editing controls are live only on the newest entry
    ensure_scenario(scenario, "newest_entry_is_editable", chat.is_editable())?;
    chat.up();
    ensure_scenario(scenario, "history_is_read_only", !chat.is_editable())?;

    chat.add_sibling(Message::new(Role::User, "rewritten"), Response::default());
    ensure_scenario(
        scenario,
        "fork_shares_the_parent",
        chat.current_entry().parent() == chat.entry(answered).parent(),
    )?;
    ensure_scenario(
        scenario,
        "fork_is_current_and_cursor",
        chat.cursor() == chat.current(),
    )?;
    ensure_scenario(
        scenario,
        "answered_turn_survives_the_fork",
        chat.entry(answered).prompt().content == "original",
    )?;
    ensure_scenario(
        scenario,
        "abandoned_draft_is_blanked",
        chat.entry(draft).prompt().content.is_empty(),
    )?;

    // down from the shared parent's level prefers the live path
    chat.top();
    ensure_scenario(
        scenario,
        "cursor_path_continues_into_the_fork",
        chat.cursor_entry().prompt().content == "rewritten",
    )?;

    println!("runner_ok=true");
    Ok(())
}

fn run_payload_emission() -> RunnerResult<()> {
    let scenario = "payload_emission";
    let mut params = match CompletionParams::new("gpt-qa") {
        Ok(params) => params,
        Err(error) => {
            return ScenarioFailedSnafu {
                stage: "scenario-payload-new",
                scenario,
                reason: error.to_string(),
            }
            .fail();
        }
    };
    params.set_messages(vec![Message::new(Role::User, "hello")]);

    let payload = params.to_request_payload();
    let object = payload.as_object().cloned().unwrap_or_default();
    ensure_scenario(
        scenario,
        "unset_controls_are_absent",
        !object.contains_key("temperature") && !object.contains_key("n"),
    )?;
    ensure_scenario(
        scenario,
        "stream_defaults_on",
        object.get("stream") == Some(&json!(true)),
    )?;

    let explicit_zero = params.set_temperature(Some(0.0)).is_ok();
    ensure_scenario(scenario, "explicit_zero_accepted", explicit_zero)?;
    let out_of_range = params.set_temperature(Some(9.0)).is_err();
    ensure_scenario(scenario, "out_of_range_rejected", out_of_range)?;

    let payload = params.to_request_payload();
    ensure_scenario(
        scenario,
        "explicit_zero_is_emitted",
        payload.get("temperature") == Some(&json!(0.0)),
    )?;

    println!("runner_ok=true");
    Ok(())
}

fn run_stream_fold() -> RunnerResult<()> {
    let scenario = "stream_fold";
    let chunks = vec![chunk("Hel"), chunk("lo"), chunk(", world")];
    let folded = Response::from_api_responses(&chunks);

    let content = folded
        .as_ref()
        .and_then(Response::first_message)
        .map(|message| message.content)
        .unwrap_or_default();
    println!("folded_content={content}");
    ensure_scenario(scenario, "chunks_fold_in_order", content == "Hello, world")?;
    ensure_scenario(
        scenario,
        "fold_keeps_one_choice",
        folded.map(|response| response.choices.len()) == Some(1),
    )?;
    ensure_scenario(
        scenario,
        "empty_batch_folds_to_nothing",
        Response::from_api_responses(&[]).is_none(),
    )?;

    println!("runner_ok=true");
    Ok(())
}

fn run_settings_roundtrip(config_path: Option<&str>) -> RunnerResult<()> {
    let scenario = "settings_roundtrip";
    let path = config_path.map(PathBuf::from).unwrap_or_else(|| {
        env::temp_dir().join(format!("tangent-qa-{}.conf", std::process::id()))
    });
    println!("config_path={}", path.display());
    let _ = std::fs::remove_file(&path);

    let mut store = SettingsStore::open(path.clone());
    ensure_scenario(
        scenario,
        "missing_file_yields_default",
        store.get(KEY_MODEL, "gpt-3.5-turbo") == "gpt-3.5-turbo",
    )?;

    let writes_ok =
        store.set(KEY_MODEL, "gpt-4").is_ok() && store.set(KEY_STREAM, "true").is_ok();
    ensure_scenario(scenario, "writes_persist", writes_ok)?;

    let reloaded = SettingsStore::open(path.clone());
    ensure_scenario(
        scenario,
        "reload_sees_written_values",
        reloaded.get(KEY_MODEL, "") == "gpt-4" && reloaded.get(KEY_STREAM, "false") == "true",
    )?;

    let _ = std::fs::remove_file(&path);
    println!("runner_ok=true");
    Ok(())
}

struct ScriptedProvider {
    chunks: Vec<Value>,
}

impl CompletionProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "gpt-qa"
    }

    fn fetch_models<'a>(&'a self) -> BoxFuture<'a, ProviderResult<Vec<String>>> {
        Box::pin(async { Ok(vec!["gpt-qa".to_string()]) })
    }

    fn complete<'a>(&'a self, _payload: Value) -> BoxFuture<'a, ProviderResult<Value>> {
        let chunks = self.chunks.clone();
        Box::pin(async move { Ok(chunks.into_iter().next().unwrap_or(Value::Null)) })
    }

    fn stream(&self, _payload: Value) -> ProviderResult<ProviderStreamHandle> {
        let (event_tx, stream, _cancel_rx) = make_event_stream();
        let chunks = self.chunks.clone();
        let worker: ProviderWorker = Box::pin(async move {
            for chunk in chunks {
                let _ = event_tx.send(StreamEvent::Chunk(chunk));
            }
            let _ = event_tx.send(StreamEvent::Done);
        });
        Ok(ProviderStreamHandle { stream, worker })
    }
}

fn chunk(content: &str) -> Value {
    json!({
        "id": "chatcmpl-qa",
        "created": 1_700_000_000,
        "model": "gpt-qa",
        "object": "chat.completion.chunk",
        "choices": [{"delta": {"content": content}}],
    })
}

async fn run_submission_cycle() -> RunnerResult<()> {
    let scenario = "submission_cycle";
    let provider = Arc::new(ScriptedProvider {
        chunks: vec![chunk("pon"), chunk("g")],
    });
    let pipeline = SubmissionPipeline::new(provider);
    let mut chat = Chat::new();

    let params = match CompletionParams::new("gpt-qa") {
        Ok(params) => params,
        Err(error) => {
            return ScenarioFailedSnafu {
                stage: "scenario-submission-params",
                scenario,
                reason: error.to_string(),
            }
            .fail();
        }
    };
    let mut handle = match pipeline.submit(&mut chat, &params, Message::new(Role::User, "ping")) {
        Ok(handle) => handle,
        Err(error) => {
            return ScenarioFailedSnafu {
                stage: "scenario-submission-submit",
                scenario,
                reason: error.to_string(),
            }
            .fail();
        }
    };

    let second = pipeline.submit(&mut chat, &params, Message::new(Role::User, "again"));
    ensure_scenario(scenario, "second_submit_refused", second.is_err())?;

    let mut deltas = Vec::new();
    let response = loop {
        match handle.recv().await {
            Some(SubmissionEvent::Delta(delta)) => deltas.push(delta),
            Some(SubmissionEvent::Completed(response)) => break response,
            Some(other) => {
                return ScenarioFailedSnafu {
                    stage: "scenario-submission-events",
                    scenario,
                    reason: format!("unexpected terminal event {other:?}"),
                }
                .fail();
            }
            None => {
                return ScenarioFailedSnafu {
                    stage: "scenario-submission-events",
                    scenario,
                    reason: "event channel closed without a terminal event".to_string(),
                }
                .fail();
            }
        }
    };
    println!("deltas={}", deltas.join("|"));
    ensure_scenario(scenario, "deltas_arrive_in_order", deltas == ["pon", "g"])?;

    apply_response(&mut chat, response);
    ensure_scenario(
        scenario,
        "reply_attached_to_the_turn",
        chat.entry(chat.path()[0])
            .response()
            .first_message()
            .map(|message| message.content)
            .as_deref()
            == Some("pong"),
    )?;
    ensure_scenario(
        scenario,
        "next_turn_is_seeded",
        chat.current_entry().prompt().is_default(),
    )?;

    println!("runner_ok=true");
    Ok(())
}
