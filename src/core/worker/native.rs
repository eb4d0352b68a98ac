//! Long-lived worker: a dedicated tokio task with a command mailbox. The task
//! keeps per-session state (message count) and answers until stopped. Pausing
//! gates message processing without tearing the task down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info};

use super::{AgentWorker, MessageContext, WorkerReply, WorkerSpec, unix_now};

enum Command {
    Process {
        text: String,
        context: MessageContext,
        reply: oneshot::Sender<WorkerReply>,
    },
    Stop,
}

pub struct NativeWorker {
    spec: WorkerSpec,
    alive: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    mailbox: Mutex<Option<mpsc::Sender<Command>>>,
}

impl NativeWorker {
    pub fn new(spec: WorkerSpec) -> Self {
        Self {
            spec,
            alive: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            mailbox: Mutex::new(None),
        }
    }
}

#[async_trait]
impl AgentWorker for NativeWorker {
    async fn start(&self) -> Result<()> {
        let mut mailbox = self.mailbox.lock().await;
        if mailbox.is_some() {
            return Err(anyhow!("worker already started"));
        }

        let (tx, mut rx) = mpsc::channel::<Command>(64);
        let alive = self.alive.clone();
        let agent_name = self.spec.agent_name.clone();
        let template = self.spec.template.name.clone();
        let persona = self.spec.template.persona.clone();

        alive.store(true, Ordering::Release);
        tokio::spawn(async move {
            let mut handled: u64 = 0;
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    Command::Process {
                        text,
                        context,
                        reply,
                    } => {
                        handled += 1;
                        let content = format!(
                            "[{}] {} Received: {}",
                            agent_name,
                            persona.trim_end_matches('.'),
                            text
                        );
                        let _ = reply.send(WorkerReply {
                            content,
                            timestamp: unix_now(),
                            metadata: serde_json::json!({
                                "template": template,
                                "messages_handled": handled,
                                "channel": context.channel,
                            }),
                        });
                    }
                    Command::Stop => break,
                }
            }
            alive.store(false, Ordering::Release);
            debug!(agent = %agent_name, "native worker task exited");
        });

        *mailbox = Some(tx);
        info!(agent = %self.spec.agent_name, "native worker started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let tx = self.mailbox.lock().await.take();
        if let Some(tx) = tx {
            let _ = tx.send(Command::Stop).await;
        }
        self.alive.store(false, Ordering::Release);
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.paused.store(true, Ordering::Release);
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.paused.store(false, Ordering::Release);
        Ok(())
    }

    async fn process_message(&self, text: &str, context: &MessageContext) -> Result<WorkerReply> {
        if self.paused.load(Ordering::Acquire) {
            return Err(anyhow!("agent '{}' is paused", self.spec.agent_name));
        }
        let tx = {
            let mailbox = self.mailbox.lock().await;
            mailbox
                .as_ref()
                .cloned()
                .ok_or_else(|| anyhow!("worker not started"))?
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(Command::Process {
            text: text.to_string(),
            context: context.clone(),
            reply: reply_tx,
        })
        .await
        .map_err(|_| anyhow!("worker mailbox closed"))?;
        reply_rx
            .await
            .map_err(|_| anyhow!("worker dropped the reply"))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}
