//! Capability registry: routes tool calls to providers behind the approval gate.
//!
//! Providers are kept in registration order. A tool name belongs to the first
//! registered provider that declares it; when that provider goes away the next
//! one in order takes the name over.

use chrono::{DateTime, Utc};
use cronbot_core::error::ToolError;
use cronbot_core::event::{DomainEvent, EventBus};
use cronbot_core::tool::{ToolDefinition, ToolOutcome, ToolProvider};
use cronbot_core::AutonomyLevel;
use cronbot_security::{ApprovalDecision, ApprovalPolicy, AuditEvent, AuditLogger, AuditOutcome};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A tool as seen through the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredTool {
    pub provider_id: String,
    #[serde(flatten)]
    pub definition: ToolDefinition,
}

/// A tool call parked until an operator decides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
}

struct ProviderEntry {
    id: String,
    provider: Arc<dyn ToolProvider>,
    tools: Vec<ToolDefinition>,
}

#[derive(Default)]
struct Providers {
    entries: Vec<ProviderEntry>,
    /// tool name -> index into `entries`
    index: HashMap<String, usize>,
}

impl Providers {
    fn rebuild_index(&mut self) {
        self.index.clear();
        for (i, entry) in self.entries.iter().enumerate() {
            for tool in &entry.tools {
                self.index.entry(tool.name.clone()).or_insert(i);
            }
        }
    }

    fn route(&self, tool_name: &str) -> Option<&ProviderEntry> {
        self.index.get(tool_name).map(|&i| &self.entries[i])
    }
}

pub struct CapabilityRegistry {
    providers: RwLock<Providers>,
    pending: Mutex<HashMap<String, PendingApproval>>,
    autonomy: RwLock<AutonomyLevel>,
    audit: Arc<AuditLogger>,
    events: Option<Arc<EventBus>>,
    actor: String,
}

impl CapabilityRegistry {
    pub fn new(level: AutonomyLevel) -> Self {
        Self {
            providers: RwLock::new(Providers::default()),
            pending: Mutex::new(HashMap::new()),
            autonomy: RwLock::new(level),
            audit: Arc::new(AuditLogger::tracing()),
            events: None,
            actor: "worker".into(),
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Name recorded as the actor in audit entries.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    /// Connect a provider and merge its tools. Registering a known id is a no-op.
    pub async fn register_server(
        &self,
        id: impl Into<String>,
        provider: Arc<dyn ToolProvider>,
    ) -> Result<(), ToolError> {
        let id = id.into();
        if self.is_registered(&id).await {
            warn!(provider = %id, "Provider already registered");
            return Ok(());
        }

        provider
            .connect()
            .await
            .map_err(|e| ToolError::ConnectionFailed {
                provider_id: id.clone(),
                reason: e.to_string(),
            })?;
        let tools = provider.list_tools().await?;

        let mut providers = self.providers.write().await;
        if providers.entries.iter().any(|e| e.id == id) {
            // Lost a race with a concurrent registration of the same id.
            drop(providers);
            if let Err(e) = provider.disconnect().await {
                warn!(provider = %id, error = %e, "Failed to disconnect duplicate provider");
            }
            return Ok(());
        }

        let tool_count = tools.len();
        providers.entries.push(ProviderEntry {
            id: id.clone(),
            provider,
            tools,
        });
        providers.rebuild_index();
        info!(provider = %id, tools = tool_count, "Tool provider registered");
        Ok(())
    }

    /// Disconnect and remove one provider. Returns false for an unknown id.
    pub async fn unregister_server(&self, id: &str) -> bool {
        let removed = {
            let mut providers = self.providers.write().await;
            let Some(pos) = providers.entries.iter().position(|e| e.id == id) else {
                return false;
            };
            let entry = providers.entries.remove(pos);
            providers.rebuild_index();
            entry
        };

        if let Err(e) = removed.provider.disconnect().await {
            warn!(provider = %id, error = %e, "Provider disconnect failed");
        }
        info!(provider = %id, "Tool provider unregistered");
        true
    }

    /// Disconnect every provider concurrently and empty the registry.
    pub async fn disconnect_all(&self) {
        let entries = {
            let mut providers = self.providers.write().await;
            providers.index.clear();
            std::mem::take(&mut providers.entries)
        };
        if entries.is_empty() {
            return;
        }

        let results = futures::future::join_all(entries.iter().map(|entry| async move {
            (entry.id.as_str(), entry.provider.disconnect().await)
        }))
        .await;
        for (id, result) in results {
            if let Err(e) = result {
                warn!(provider = %id, error = %e, "Provider disconnect failed");
            }
        }
        info!(count = entries.len(), "All tool providers disconnected");
    }

    async fn is_registered(&self, id: &str) -> bool {
        self.providers.read().await.entries.iter().any(|e| e.id == id)
    }

    pub async fn connected_servers(&self) -> Vec<String> {
        self.providers
            .read()
            .await
            .entries
            .iter()
            .map(|e| e.id.clone())
            .collect()
    }

    /// Which provider a tool name routes to.
    pub async fn find_provider(&self, tool_name: &str) -> Option<String> {
        self.providers
            .read()
            .await
            .route(tool_name)
            .map(|e| e.id.clone())
    }

    /// The aggregate tool list, one entry per name, in registration order.
    pub async fn all_tools(&self) -> Vec<RegisteredTool> {
        let providers = self.providers.read().await;
        let mut tools = Vec::with_capacity(providers.index.len());
        for (i, entry) in providers.entries.iter().enumerate() {
            for tool in &entry.tools {
                if providers.index.get(&tool.name) == Some(&i) {
                    tools.push(RegisteredTool {
                        provider_id: entry.id.clone(),
                        definition: tool.clone(),
                    });
                }
            }
        }
        tools
    }

    /// Tool definitions to offer the oracle.
    pub async fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.all_tools()
            .await
            .into_iter()
            .map(|t| t.definition)
            .collect()
    }

    pub async fn autonomy_level(&self) -> AutonomyLevel {
        *self.autonomy.read().await
    }

    /// Takes effect on the next `call_tool`; calls already past the gate are unaffected.
    pub async fn set_autonomy_level(&self, level: AutonomyLevel) {
        let previous = std::mem::replace(&mut *self.autonomy.write().await, level);
        if previous != level {
            info!(from = %previous, to = %level, "Autonomy level changed");
            self.audit.log(
                AuditEvent::AutonomyChanged {
                    from: previous.name().into(),
                    to: level.name().into(),
                },
                &self.actor,
                "autonomy",
                AuditOutcome::Success,
                None,
            );
        }
    }

    /// Route a call through the approval gate.
    ///
    /// Unknown tools are a `Failure`; gated tools come back as
    /// `RequiresApproval` without touching the provider.
    pub async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> ToolOutcome {
        if self.find_provider(name).await.is_none() {
            return ToolOutcome::failure(ToolError::NotFound(name.into()));
        }

        let level = self.autonomy_level().await;
        match ApprovalPolicy::evaluate(name, level) {
            ApprovalDecision::Allowed => {
                debug!(tool = name, level = %level, "Approval gate passed");
                self.audit.log(
                    AuditEvent::ApprovalGate {
                        tool_name: name.into(),
                    },
                    &self.actor,
                    name,
                    AuditOutcome::Success,
                    None,
                );
                self.invoke_unchecked(name, arguments).await
            }
            ApprovalDecision::RequiresApproval { reason } => {
                info!(tool = name, level = %level, "Approval required");
                self.audit.log(
                    AuditEvent::ApprovalGate {
                        tool_name: name.into(),
                    },
                    &self.actor,
                    name,
                    AuditOutcome::Denied,
                    Some(reason.clone()),
                );
                ToolOutcome::RequiresApproval { reason }
            }
        }
    }

    /// Invoke without evaluating the policy. Only for calls already approved.
    async fn invoke_unchecked(&self, name: &str, arguments: serde_json::Value) -> ToolOutcome {
        let provider = {
            let providers = self.providers.read().await;
            match providers.route(name) {
                Some(entry) => Arc::clone(&entry.provider),
                None => return ToolOutcome::failure(ToolError::NotFound(name.into())),
            }
        };

        let started = Instant::now();
        let outcome = match provider.invoke(name, arguments).await {
            Ok(result) => ToolOutcome::from(result),
            Err(e) => ToolOutcome::failure(e),
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        debug!(
            tool = name,
            success = outcome.is_success(),
            duration_ms,
            "Tool invoked"
        );
        let (audit_outcome, details) = match &outcome {
            ToolOutcome::Success { .. } => (AuditOutcome::Success, None),
            other => (AuditOutcome::Failure, Some(other.summary())),
        };
        self.audit.log(
            AuditEvent::ToolExecution {
                tool_name: name.into(),
            },
            &self.actor,
            name,
            audit_outcome,
            details,
        );
        outcome
    }

    /// Park a gated call for an operator and return its id.
    pub async fn request_approval(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
        reason: impl Into<String>,
    ) -> String {
        let id = format!("approval_{}", Uuid::new_v4().simple());
        let reason = reason.into();
        self.pending.lock().await.insert(
            id.clone(),
            PendingApproval {
                id: id.clone(),
                tool_name: tool_name.into(),
                arguments,
                reason: reason.clone(),
                requested_at: Utc::now(),
            },
        );

        info!(approval_id = %id, tool = tool_name, "Approval requested");
        self.audit.log(
            AuditEvent::ApprovalRequested {
                approval_id: id.clone(),
                tool_name: tool_name.into(),
            },
            &self.actor,
            tool_name,
            AuditOutcome::Success,
            Some(reason),
        );
        self.publish(DomainEvent::ApprovalRequested {
            approval_id: id.clone(),
            tool_name: tool_name.into(),
            timestamp: Utc::now(),
        });
        id
    }

    /// Execute a parked call. A missing id is a `Failure`, never a panic.
    pub async fn approve_operation(&self, approval_id: &str) -> ToolOutcome {
        let Some(pending) = self.pending.lock().await.remove(approval_id) else {
            return ToolOutcome::failure(ToolError::ApprovalNotFound(approval_id.into()));
        };

        info!(approval_id, tool = %pending.tool_name, "Operation approved, executing");
        self.audit.log(
            AuditEvent::ApprovalGranted {
                approval_id: approval_id.into(),
            },
            "operator",
            &pending.tool_name,
            AuditOutcome::Success,
            None,
        );
        self.publish(DomainEvent::ApprovalResolved {
            approval_id: approval_id.into(),
            approved: true,
            timestamp: Utc::now(),
        });

        self.invoke_unchecked(&pending.tool_name, pending.arguments)
            .await
    }

    /// Discard a parked call.
    pub async fn reject_operation(&self, approval_id: &str) -> ToolOutcome {
        let Some(pending) = self.pending.lock().await.remove(approval_id) else {
            return ToolOutcome::failure(ToolError::ApprovalNotFound(approval_id.into()));
        };

        info!(approval_id, tool = %pending.tool_name, "Operation rejected");
        self.audit.log(
            AuditEvent::ApprovalRejected {
                approval_id: approval_id.into(),
            },
            "operator",
            &pending.tool_name,
            AuditOutcome::Denied,
            None,
        );
        self.publish(DomainEvent::ApprovalResolved {
            approval_id: approval_id.into(),
            approved: false,
            timestamp: Utc::now(),
        });

        ToolOutcome::failure(ToolError::Rejected(pending.tool_name))
    }

    /// Pending approvals, oldest first.
    pub async fn pending_approvals(&self) -> Vec<PendingApproval> {
        let mut pending: Vec<_> = self.pending.lock().await.values().cloned().collect();
        pending.sort_by(|a, b| a.requested_at.cmp(&b.requested_at).then(a.id.cmp(&b.id)));
        pending
    }
}
