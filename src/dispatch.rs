//! Per-tenant dispatch: the sequential consumer of a tenant's event lane.
//!
//! Each tenant gets exactly one dispatch task. The task drains its queue in
//! FIFO order, audits every event, and hands command interactions to their
//! handlers on independent tasks so a slow command cannot stall the lane.
//! Ordering is therefore guaranteed up to handler invocation, not completion.
//!
//! The drain loop runs under a supervisor: if it panics, the panic is logged
//! with a captured stack trace and a fresh loop resumes consuming the same
//! queue. A panicking command task only loses that one response.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Once};

use futures::FutureExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::ResilientCache;
use crate::event::{Event, Interaction, InteractionKind, TenantId};
use crate::handler::{CommandRegistry, Dependencies};
use crate::registry::NewLane;
use crate::respond::{Failure, Responder};
use crate::store::{AuditRecord, Persistence, Record};

/// Shared collaborators handed to every tenant's dispatch task.
pub(crate) struct Dispatcher {
    pub store: Arc<dyn Persistence>,
    pub cache: Arc<ResilientCache>,
    pub responder: Arc<dyn Responder>,
    pub commands: Arc<CommandRegistry>,
}

impl Dispatcher {
    /// Spawn the dispatch task (and relay forwarder) for a freshly created
    /// lane. The supervisor owns the receivers; a panicking drain loop is
    /// relaunched against the same queue.
    pub fn spawn(self: &Arc<Self>, tenant_id: TenantId, lane: NewLane) -> JoinHandle<()> {
        install_panic_capture();
        let this = self.clone();
        tokio::spawn(async move {
            let cancel = lane.context.cancel_token();
            let relay_tx = lane.context.relay_sender();
            let mut events = lane.events;

            let relay_task = tokio::spawn(relay_forward(
                tenant_id.clone(),
                lane.relay,
                this.responder.clone(),
                cancel.clone(),
            ));

            loop {
                let drain = AssertUnwindSafe(this.drain(&tenant_id, &cancel, &mut events, &relay_tx))
                    .catch_unwind();
                match drain.await {
                    Ok(()) => break,
                    Err(panic) => {
                        error!(
                            tenant = %tenant_id,
                            panic = %panic_message(&panic),
                            backtrace = %take_backtrace(),
                            "dispatch loop panicked, relaunching"
                        );
                    }
                }
            }

            let _ = relay_task.await;
            debug!(tenant = %tenant_id, "dispatch task exited");
        })
    }

    async fn drain(
        &self,
        tenant_id: &TenantId,
        cancel: &CancellationToken,
        events: &mut mpsc::Receiver<Event>,
        relay: &mpsc::Sender<String>,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                maybe = events.recv() => {
                    let Some(event) = maybe else { return };
                    self.process(tenant_id, cancel, relay, event).await;
                }
            }
        }
    }

    async fn process(
        &self,
        tenant_id: &TenantId,
        cancel: &CancellationToken,
        relay: &mpsc::Sender<String>,
        event: Event,
    ) {
        // Audit copy first; a persistence failure never blocks dispatch.
        let audit = AuditRecord::for_event(&event);
        if let Err(e) = self.store.create(Record::Audit(audit)).await {
            warn!(tenant = %tenant_id, error = %e, "error storing audit record");
        }

        match event {
            Event::Command(interaction) => {
                self.handle_interaction(tenant_id, cancel, relay, interaction)
                    .await;
            }
            Event::MessageDeleted {
                channel_id,
                message_id,
                ..
            } => {
                debug!(
                    tenant = %tenant_id,
                    channel = %channel_id,
                    message = %message_id,
                    "message deletion observed"
                );
            }
            Event::VoiceUpdate { user_id, .. } => {
                debug!(tenant = %tenant_id, user = %user_id, "voice state update observed");
            }
            // Snapshot refreshes re-register the lane at the router level and
            // are not expected here.
            Event::TenantUpdate(_) => {
                debug!(tenant = %tenant_id, "ignoring tenant update in dispatch lane");
            }
        }
    }

    async fn handle_interaction(
        &self,
        tenant_id: &TenantId,
        cancel: &CancellationToken,
        relay: &mpsc::Sender<String>,
        interaction: Interaction,
    ) {
        // Handlers get the current tenant record; failing to fetch it is a
        // handled failure for the end user, not a lane fault.
        let tenant = match self.store.get_tenant(tenant_id).await {
            Ok(t) => t,
            Err(e) => {
                let failure = Failure::internal("Failed to fetch tenant")
                    .with_data(json!({ "error": e.to_string(), "tenant": tenant_id.as_str() }));
                if let Err(e) = self.responder.fail(&interaction, failure).await {
                    warn!(tenant = %tenant_id, error = %e, "error reporting tenant fetch failure");
                }
                return;
            }
        };

        let name = match &interaction.kind {
            InteractionKind::ApplicationCommand { name, .. } => name.clone(),
            InteractionKind::MessageComponent { .. } => return,
        };

        let Some(handler) = self.commands.by_name(&name) else {
            if let Err(e) = self
                .responder
                .fail(&interaction, Failure::not_found("No registered command"))
                .await
            {
                warn!(tenant = %tenant_id, error = %e, "error reporting unknown command");
            }
            return;
        };

        info!(
            tenant = %tenant_id,
            user = %interaction.user,
            command = %name,
            "command issued"
        );

        let deps = Dependencies {
            tenant,
            options: interaction.map_options(),
            interaction: interaction.clone(),
            cache: self.cache.clone(),
            store: self.store.clone(),
            responder: self.responder.clone(),
            relay: relay.clone(),
            cancel: cancel.clone(),
        };

        // Run the handler on its own task so a slow command cannot block the
        // queue drain. A panic here terminates only this response.
        let responder = self.responder.clone();
        let tenant_id = tenant_id.clone();
        tokio::spawn(async move {
            let run = AssertUnwindSafe(handler.handle(deps)).catch_unwind();
            match run.await {
                Ok(Ok(())) => {}
                Ok(Err(failure)) => {
                    error!(
                        tenant = %tenant_id,
                        command = %name,
                        error = %failure,
                        "error handling command"
                    );
                    if let Err(e) = responder.fail(&interaction, failure).await {
                        warn!(tenant = %tenant_id, error = %e, "error reporting command failure");
                    }
                }
                Err(panic) => {
                    error!(
                        tenant = %tenant_id,
                        command = %name,
                        panic = %panic_message(&panic),
                        backtrace = %take_backtrace(),
                        "command handler panicked"
                    );
                }
            }
        });
    }
}

/// Drain the tenant's relay lane into the response collaborator.
async fn relay_forward(
    tenant_id: TenantId,
    mut relay: mpsc::Receiver<String>,
    responder: Arc<dyn Responder>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            maybe = relay.recv() => {
                let Some(line) = maybe else { return };
                if let Err(e) = responder.post(&tenant_id, &line).await {
                    warn!(tenant = %tenant_id, error = %e, "error posting relay line");
                }
            }
        }
    }
}

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Install the process-wide panic hook that stashes a backtrace for the
/// recovery logs. `catch_unwind` only hands back the payload; the hook runs
/// while the stack is still live, so this is the one place the trace can be
/// captured. Idempotent; chains to the previously installed hook.
pub(crate) fn install_panic_capture() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            LAST_BACKTRACE.with(|slot| {
                *slot.borrow_mut() = Some(Backtrace::force_capture().to_string());
            });
            previous(info);
        }));
    });
}

/// Take the backtrace captured by the hook for the panic just caught on this
/// thread. `catch_unwind` resolves on the thread that panicked, so reading
/// the thread-local before the next await point is safe.
pub(crate) fn take_backtrace() -> String {
    LAST_BACKTRACE
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_else(|| "<no backtrace captured>".to_string())
}

/// Best-effort rendering of a panic payload.
pub(crate) fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
