use super::*;

/// What started a run.
#[derive(Debug, Clone)]
pub(super) enum RunTrigger {
    Initial { chat_id: String },
    Update { prompt: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOutcome {
    pub url: String,
    pub steps: usize,
    /// Invocations that reached the sandbox, failed ones included.
    pub tool_calls: usize,
    pub files_changed: usize,
    pub hit_step_limit: bool,
    pub usage: TokenUsage,
}

/// One model round as it will be written to the log.
#[derive(Debug, Default)]
struct StepRecord {
    text: String,
    invocations: Vec<NewConversationEntry>,
}

struct RunState {
    steps: Vec<StepRecord>,
    executed: usize,
    files_changed: usize,
    usage: TokenUsage,
    hit_step_limit: bool,
}

impl RunState {
    fn entries(&self) -> Vec<NewConversationEntry> {
        let mut entries = Vec::new();
        for step in &self.steps {
            if !step.text.is_empty() {
                entries.push(NewConversationEntry::assistant_text(step.text.clone()));
            }
            entries.extend(step.invocations.iter().cloned());
        }
        entries
    }
}

impl Orchestrator {
    pub async fn generate_project(
        &self,
        project_id: &str,
        chat_id: &str,
    ) -> Result<GenerationOutcome, OrchestratorError> {
        let chat_id = chat_id.trim();
        if chat_id.is_empty() {
            return Err(OrchestratorError::validation("Invalid Request Body"));
        }
        self.run_detached(
            project_id,
            RunTrigger::Initial {
                chat_id: chat_id.to_string(),
            },
        )
        .await
    }

    pub async fn update_project(
        &self,
        project_id: &str,
        prompt: &str,
    ) -> Result<GenerationOutcome, OrchestratorError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(OrchestratorError::validation("Invalid Request Body"));
        }
        self.run_detached(
            project_id,
            RunTrigger::Update {
                prompt: prompt.to_string(),
            },
        )
        .await
    }

    /// The run owns its own task: a caller that goes away mid-run does not stop
    /// it before the completed steps are committed and the lease is released.
    async fn run_detached(
        &self,
        project_id: &str,
        trigger: RunTrigger,
    ) -> Result<GenerationOutcome, OrchestratorError> {
        let orchestrator = self.clone();
        let project_id = project_id.to_string();
        let task = tokio::spawn(async move {
            orchestrator.run_generation(&project_id, trigger).await
        });
        task.await.map_err(|err| {
            error!("generation task aborted: {err}");
            OrchestratorError::internal(format!("generation task aborted: {err}"))
        })?
    }

    async fn run_generation(
        &self,
        project_id: &str,
        trigger: RunTrigger,
    ) -> Result<GenerationOutcome, OrchestratorError> {
        let project = self.resolve_project(project_id).await?;
        let prompt = match &trigger {
            RunTrigger::Initial { chat_id } => self.initial_prompt(&project, chat_id).await?,
            RunTrigger::Update { prompt } => prompt.clone(),
        };

        let lease = self
            .limiter
            .acquire(&project.project_id)
            .await
            .map_err(|err| OrchestratorError::internal(err.to_string()))?
            .ok_or_else(|| OrchestratorError::project_busy(&project.project_id))?;
        let result = self.run_leased(&project, &trigger, &prompt).await;
        lease.release().await;
        result
    }

    /// Generate replays a prompt already in the log; the id must name that entry.
    async fn initial_prompt(
        &self,
        project: &ProjectRecord,
        chat_id: &str,
    ) -> Result<String, OrchestratorError> {
        let entry = self
            .store
            .entry(chat_id)
            .await
            .map_err(OrchestratorError::from_storage)?
            .filter(|entry| {
                entry.project_id == project.project_id
                    && entry.originator == Originator::User
                    && entry.kind == EntryKind::TextMessage
            })
            .ok_or_else(|| OrchestratorError::chat_not_found(chat_id))?;
        Ok(entry.content)
    }

    async fn run_leased(
        &self,
        project: &ProjectRecord,
        trigger: &RunTrigger,
        prompt: &str,
    ) -> Result<GenerationOutcome, OrchestratorError> {
        let config = self.config_store.get().await;
        let project_id = project.project_id.as_str();

        let mut earlier_requests = Vec::new();
        if let RunTrigger::Update { .. } = trigger {
            earlier_requests = self.earlier_requests(project_id).await?;
            self.store
                .begin_update(project_id, prompt)
                .await
                .map_err(OrchestratorError::from_storage)?;
        }

        let handle = self.reconnect(project).await?;
        let url = format!("https://{}", handle.host(config.sandbox.preview_port));
        let dispatcher = ToolDispatcher::bind(handle);
        let tools = tool_definitions();
        let mut messages = vec![
            ChatMessage::system(prompt::system_prompt(&config.sandbox)),
            ChatMessage::user(prompt::task_message(prompt, &earlier_requests)),
        ];
        let max_steps = step_budget(config.generation.max_steps);
        let mut state = RunState {
            steps: Vec::new(),
            executed: 0,
            files_changed: 0,
            usage: TokenUsage::default(),
            hit_step_limit: false,
        };
        info!(
            project_id,
            sandbox_id = dispatcher.sandbox_id(),
            max_steps,
            "generation run started"
        );

        let mut stream_error = None;
        for step in 0..max_steps {
            let mut streamed_chars = 0usize;
            let mut on_delta = |delta: &str| streamed_chars += delta.chars().count();
            let response = match self
                .model
                .stream_with_tools(&messages, &tools, &mut on_delta)
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    warn!(project_id, step, "model stream failed: {err:#}");
                    stream_error = Some(err);
                    break;
                }
            };
            if let Some(usage) = &response.usage {
                state.usage.accumulate(usage);
            }
            debug!(
                project_id,
                step,
                streamed_chars,
                reasoning_chars = response.reasoning.chars().count(),
                "model round drained"
            );

            let calls = collect_tool_calls_from_output(&response.content, response.tool_calls.as_ref());
            let text = strip_tool_calls(&response.content);
            if calls.is_empty() {
                state.steps.push(StepRecord {
                    text,
                    invocations: Vec::new(),
                });
                break;
            }

            let record = self
                .run_step(project_id, step, &dispatcher, &response, calls, &mut messages, &mut state)
                .await;
            state.steps.push(StepRecord { text, ..record });
            if step + 1 == max_steps {
                state.hit_step_limit = true;
                info!(project_id, max_steps, "generation run reached step limit");
            }
        }

        let entries = state.entries();
        let logged = entries.len();
        match stream_error {
            None => {
                self.store
                    .commit_run(project_id, entries, Some(ProjectStatus::Ready))
                    .await
                    .map_err(OrchestratorError::from_storage)?;
                info!(
                    project_id,
                    steps = state.steps.len(),
                    tool_calls = state.executed,
                    logged,
                    "generation run finished"
                );
                Ok(GenerationOutcome {
                    url,
                    steps: state.steps.len(),
                    tool_calls: state.executed,
                    files_changed: state.files_changed,
                    hit_step_limit: state.hit_step_limit,
                    usage: state.usage,
                })
            }
            Some(err) => {
                // Completed steps stay in the log; status is left as the run found it.
                self.store
                    .commit_run(project_id, entries, None)
                    .await
                    .map_err(OrchestratorError::from_storage)?;
                if state.executed > 0 {
                    Err(OrchestratorError::partial_run(json!({
                        "projectId": project_id,
                        "completedSteps": state.steps.len(),
                        "toolCalls": state.executed,
                        "reason": err.to_string(),
                    })))
                } else {
                    Err(OrchestratorError::model_unavailable(err))
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_step(
        &self,
        project_id: &str,
        step: usize,
        dispatcher: &ToolDispatcher,
        response: &LlmResponse,
        calls: Vec<ToolCall>,
        messages: &mut Vec<ChatMessage>,
        state: &mut RunState,
    ) -> StepRecord {
        let call_ids = calls
            .iter()
            .enumerate()
            .map(|(index, call)| {
                call.id
                    .clone()
                    .unwrap_or_else(|| format!("{TOOL_CALL_ID_PREFIX}_{step}_{index}"))
            })
            .collect::<Vec<_>>();
        let payload = calls
            .iter()
            .zip(&call_ids)
            .map(|(call, id)| call.to_payload(id))
            .collect::<Vec<_>>();
        messages.push(ChatMessage::assistant(
            strip_tool_calls(&response.content),
            Some(Value::Array(payload)),
        ));

        let mut record = StepRecord::default();
        for (call, call_id) in calls.into_iter().zip(call_ids) {
            let observation = match resolve_invocation(&call) {
                Ok(invocation) => {
                    state.executed += 1;
                    match dispatcher.dispatch(&invocation).await {
                        Ok(observation) => {
                            if invocation.tool.mutates() {
                                state.files_changed += 1;
                            }
                            info!(
                                project_id,
                                step,
                                tool = invocation.tool.model_name(),
                                location = %invocation.location,
                                "tool call executed"
                            );
                            record.invocations.push(NewConversationEntry::assistant_tool(
                                invocation.tool,
                                invocation.describe(),
                            ));
                            observation
                        }
                        Err(err) => {
                            warn!(
                                project_id,
                                step,
                                tool = invocation.tool.model_name(),
                                location = %invocation.location,
                                "tool call failed: {err}"
                            );
                            record.invocations.push(NewConversationEntry::assistant_tool(
                                invocation.tool,
                                format!("{}{FAILED_TOOL_SUFFIX}", invocation.describe()),
                            ));
                            format!("{TOOL_ERROR_PREFIX}{err}")
                        }
                    }
                }
                Err(message) => {
                    warn!(project_id, step, tool = %call.name, "rejected tool call: {message}");
                    format!("{TOOL_ERROR_PREFIX}{message}")
                }
            };
            messages.push(ChatMessage::tool(call_id, observation));
        }
        record
    }

    async fn earlier_requests(&self, project_id: &str) -> Result<Vec<String>, OrchestratorError> {
        let log = self
            .store
            .list_ordered(project_id)
            .await
            .map_err(OrchestratorError::from_storage)?;
        Ok(log
            .entries
            .into_iter()
            .filter(|entry| entry.originator == Originator::User)
            .map(|entry| entry.content)
            .collect())
    }
}

/// Configured step limit, kept within one and the hard cap.
fn step_budget(configured: usize) -> usize {
    configured.clamp(1, MAX_STEPS)
}

/// Closed mapping from model-facing name to capability; anything else is refused.
fn resolve_invocation(call: &ToolCall) -> Result<FileToolInvocation, String> {
    let tool = FileTool::from_model_name(&call.name)
        .ok_or_else(|| format!("unknown tool {}", call.name))?;
    FileToolInvocation::parse(tool, &call.arguments).map_err(|err| match err {
        ToolError::InvalidArguments(detail) => format!("invalid arguments for {}: {detail}", call.name),
        other => other.to_string(),
    })
}
