//! Explicit chat context: shared engine services and per-widget sessions.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use rand::{rngs::StdRng, SeedableRng};
use tokio::sync::mpsc;

use crate::backend::{HttpQaBackend, QaBackend};
use crate::config::Config;
use crate::error::ChatError;
use crate::greeting::{render_greeting, GreetingContext};
use crate::orchestrator::{ChatOrchestrator, PendingReply, TypingDelay};
use crate::resolver::{AnswerResolver, KnowledgeBase};
use crate::session::{SessionAction, SessionReducer, SessionStore};
use crate::types::{SessionEvent, SessionState};

/// Services shared by every mounted widget.
pub struct ChatEngine {
    resolver: Arc<AnswerResolver>,
    greeting: String,
    delay: TypingDelay,
    rng: Arc<Mutex<StdRng>>,
}

impl ChatEngine {
    pub fn builder(knowledge: Arc<KnowledgeBase>) -> ChatEngineBuilder {
        ChatEngineBuilder {
            knowledge,
            backend: None,
            greeting: None,
            delay: TypingDelay::default(),
            remote_timeout: Duration::from_millis(5000),
            seed: None,
        }
    }

    pub async fn from_config(config: &Config) -> Result<Self, ChatError> {
        let knowledge = match &config.qa_seed_path {
            Some(path) => KnowledgeBase::load(path).await?,
            None => KnowledgeBase::with_defaults(),
        };

        let greeting = render_greeting(&GreetingContext {
            bot_name: &config.bot_name,
            template: config.greeting_template.as_deref(),
        });

        let mut builder = Self::builder(Arc::new(knowledge))
            .greeting(greeting)
            .typing_delay(config.typing_delay)
            .remote_timeout(config.remote_timeout);

        if let Some(base_url) = &config.qa_api_base_url {
            let backend = HttpQaBackend::new(base_url, config.remote_timeout)?;
            builder = builder.backend(Arc::new(backend));
            tracing::info!(base_url = %base_url, "remote tenant Q&A lookups enabled");
        }
        if let Some(seed) = config.rng_seed {
            builder = builder.seed(seed);
        }

        Ok(builder.build())
    }

    pub fn resolver(&self) -> &Arc<AnswerResolver> {
        &self.resolver
    }

    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    /// Creates a new widget session with its own store.
    pub fn mount(&self, tenant_id: Option<String>) -> ChatWidget {
        let store = Arc::new(SessionStore::new(SessionReducer::new(self.greeting.as_str())));
        if tenant_id.is_some() {
            store.dispatch(SessionAction::SetTenant(tenant_id));
        }
        let orchestrator = ChatOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&self.resolver),
            self.delay,
            Arc::clone(&self.rng),
        );
        ChatWidget {
            store,
            orchestrator,
        }
    }
}

pub struct ChatEngineBuilder {
    knowledge: Arc<KnowledgeBase>,
    backend: Option<Arc<dyn QaBackend>>,
    greeting: Option<String>,
    delay: TypingDelay,
    remote_timeout: Duration,
    seed: Option<u64>,
}

impl ChatEngineBuilder {
    pub fn backend(mut self, backend: Arc<dyn QaBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = Some(greeting.into());
        self
    }

    pub fn typing_delay(mut self, delay: TypingDelay) -> Self {
        self.delay = delay;
        self
    }

    pub fn remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> ChatEngine {
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let greeting = self.greeting.unwrap_or_else(|| {
            render_greeting(&GreetingContext {
                bot_name: "",
                template: None,
            })
        });
        ChatEngine {
            resolver: Arc::new(AnswerResolver::new(
                self.knowledge,
                self.backend,
                self.remote_timeout,
            )),
            greeting,
            delay: self.delay,
            rng: Arc::new(Mutex::new(rng)),
        }
    }
}

/// One mounted chat widget. Dropping it disposes the session.
pub struct ChatWidget {
    store: Arc<SessionStore>,
    orchestrator: ChatOrchestrator,
}

impl ChatWidget {
    pub fn send_message(&self, content: &str) -> Option<PendingReply> {
        self.orchestrator.send_message(content)
    }

    pub fn toggle_chat_open(&self) {
        self.store.dispatch(SessionAction::ToggleChatOpen);
    }

    pub fn reset_session(&self) {
        self.store.reset();
    }

    pub fn set_tenant(&self, tenant_id: Option<String>) {
        self.store.dispatch(SessionAction::SetTenant(tenant_id));
    }

    pub fn snapshot(&self) -> SessionState {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        self.store.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.store.generation()
    }

    pub fn is_disposed(&self) -> bool {
        self.store.is_disposed()
    }

    pub fn dispose(&self) {
        self.store.dispose();
    }
}

impl Drop for ChatWidget {
    fn drop(&mut self) {
        self.store.dispose();
    }
}
