//! Q&A lookup: tenant entries first, then the global set.
//!
//! Matching is deliberately loose. Both sides are trimmed and lowercased and
//! an entry matches when its question contains the query or the query
//! contains its question. The first match in iteration order wins; there is
//! no ranking.

use std::{
    collections::{HashMap, VecDeque},
    path::Path,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use serde::Deserialize;

use crate::backend::QaBackend;
use crate::error::ChatError;
use crate::types::QaEntry;

pub fn normalize_text(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Bidirectional, case-insensitive containment. Blank input never matches.
pub fn question_matches(question: &str, query: &str) -> bool {
    let question = normalize_text(question);
    let query = normalize_text(query);
    if question.is_empty() || query.is_empty() {
        return false;
    }
    question.contains(&query) || query.contains(&question)
}

pub fn find_entry<'a>(entries: &'a [QaEntry], query: &str) -> Option<&'a QaEntry> {
    entries
        .iter()
        .find(|entry| question_matches(&entry.question, query))
}

pub fn default_entries() -> Vec<QaEntry> {
    vec![
        QaEntry::new(
            "What are your business hours?",
            "Our business hours are Monday to Friday, 9 AM to 6 PM (EST).",
        )
        .with_category("general"),
        QaEntry::new(
            "How can I contact support?",
            "You can reach our support team at support@example.com or through the contact form on our website.",
        )
        .with_category("support"),
        QaEntry::new(
            "Do you offer a free trial?",
            "Yes! Every new account starts with a 14-day free trial, no credit card required.",
        )
        .with_category("billing"),
        QaEntry::new(
            "How do I add the chat widget to my website?",
            "Copy the embed snippet from your dashboard and paste it just before the closing </body> tag of your site.",
        )
        .with_category("setup"),
        QaEntry::new(
            "What payment methods do you accept?",
            "We accept all major credit cards and PayPal.",
        )
        .with_category("billing"),
        QaEntry::new(
            "How do I reset my password?",
            "Click \"Forgot password\" on the login page and follow the link we email you.",
        )
        .with_category("account"),
    ]
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SeedFile {
    List(Vec<QaEntry>),
    Wrapped { qas: Vec<QaEntry> },
}

/// Local Q&A sets. The global set is fixed at construction; tenant sets are
/// seeded and later replaced by whatever the remote API returns.
///
/// At most `tenant_capacity` tenant sets are kept; storing one more evicts
/// the set that was stored longest ago.
#[derive(Debug)]
pub struct KnowledgeBase {
    global: Vec<QaEntry>,
    tenants: RwLock<TenantCache>,
}

pub const DEFAULT_TENANT_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct TenantCache {
    sets: HashMap<String, Vec<QaEntry>>,
    order: VecDeque<String>,
    capacity: usize,
}

impl TenantCache {
    fn insert(&mut self, tenant_id: String, entries: Vec<QaEntry>) {
        if self.sets.insert(tenant_id.clone(), entries).is_some() {
            self.order.retain(|id| *id != tenant_id);
        }
        self.order.push_back(tenant_id);
        while self.order.len() > self.capacity.max(1) {
            if let Some(evicted) = self.order.pop_front() {
                self.sets.remove(&evicted);
                tracing::debug!(tenant_id = %evicted, "evicted tenant Q&A set");
            }
        }
    }
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl KnowledgeBase {
    /// Splits entries by their `userId`: scoped entries go to that tenant,
    /// the rest form the global set.
    pub fn new(entries: Vec<QaEntry>) -> Self {
        let mut global = Vec::new();
        let mut tenants = TenantCache::default();
        for entry in entries {
            match entry.user_id.clone().filter(|id| !id.trim().is_empty()) {
                Some(tenant_id) => {
                    if !tenants.sets.contains_key(&tenant_id) {
                        tenants.order.push_back(tenant_id.clone());
                    }
                    tenants.sets.entry(tenant_id).or_default().push(entry);
                }
                None => global.push(entry),
            }
        }
        // Seeded tenants always fit.
        tenants.capacity = DEFAULT_TENANT_CAPACITY.max(tenants.order.len());
        Self {
            global,
            tenants: RwLock::new(tenants),
        }
    }

    /// Limits how many tenant sets are cached, evicting the oldest if needed.
    pub fn with_tenant_capacity(self, capacity: usize) -> Self {
        let mut tenants = self.tenants.into_inner().unwrap_or_else(PoisonError::into_inner);
        tenants.capacity = capacity.max(1);
        while tenants.order.len() > tenants.capacity {
            if let Some(evicted) = tenants.order.pop_front() {
                tenants.sets.remove(&evicted);
            }
        }
        Self {
            global: self.global,
            tenants: RwLock::new(tenants),
        }
    }

    pub fn tenant_count(&self) -> usize {
        self.tenants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sets
            .len()
    }

    pub fn with_defaults() -> Self {
        Self::new(default_entries())
    }

    /// Accepts either a bare JSON array of entries or `{ "qas": [...] }`.
    pub fn from_json(raw: &str) -> Result<Self, ChatError> {
        let seed: SeedFile =
            serde_json::from_str(raw).map_err(|err| ChatError::seed(err.to_string()))?;
        let entries = match seed {
            SeedFile::List(entries) => entries,
            SeedFile::Wrapped { qas } => qas,
        };
        Ok(Self::new(entries))
    }

    pub async fn load(path: &Path) -> Result<Self, ChatError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| ChatError::seed(format!("{}: {err}", path.display())))?;
        let knowledge = Self::from_json(&raw)?;
        tracing::info!(
            path = %path.display(),
            global = knowledge.global.len(),
            "loaded Q&A seed file"
        );
        Ok(knowledge)
    }

    pub fn global_entries(&self) -> &[QaEntry] {
        &self.global
    }

    pub fn tenant_entries(&self, tenant_id: &str) -> Vec<QaEntry> {
        self.tenants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sets
            .get(tenant_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn replace_tenant(&self, tenant_id: &str, entries: Vec<QaEntry>) {
        self.tenants
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tenant_id.to_string(), entries);
    }

    pub fn lookup_tenant(&self, tenant_id: &str, query: &str) -> Option<String> {
        let tenants = self.tenants.read().unwrap_or_else(PoisonError::into_inner);
        let entries = tenants.sets.get(tenant_id)?;
        find_entry(entries, query).map(|entry| entry.answer.clone())
    }

    pub fn lookup_global(&self, query: &str) -> Option<String> {
        find_entry(&self.global, query).map(|entry| entry.answer.clone())
    }

    /// Tenant set first when a tenant is given, then the global set.
    pub fn resolve_local(&self, query: &str, tenant_id: Option<&str>) -> Option<String> {
        tenant_id
            .and_then(|tenant_id| self.lookup_tenant(tenant_id, query))
            .or_else(|| self.lookup_global(query))
    }
}

pub struct AnswerResolver {
    knowledge: Arc<KnowledgeBase>,
    backend: Option<Arc<dyn QaBackend>>,
    remote_timeout: Duration,
}

impl AnswerResolver {
    pub fn new(
        knowledge: Arc<KnowledgeBase>,
        backend: Option<Arc<dyn QaBackend>>,
        remote_timeout: Duration,
    ) -> Self {
        Self {
            knowledge,
            backend,
            remote_timeout,
        }
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeBase> {
        &self.knowledge
    }

    pub fn backend(&self) -> Option<&Arc<dyn QaBackend>> {
        self.backend.as_ref()
    }

    /// Remote tenant set, then the local tenant set, then the global set.
    ///
    /// Remote failures are logged and otherwise ignored; `None` means nothing
    /// matched anywhere.
    pub async fn resolve(&self, query: &str, tenant_id: Option<&str>) -> Option<String> {
        let tenant_id = tenant_id.filter(|id| !id.trim().is_empty());

        if let (Some(tenant_id), Some(backend)) = (tenant_id, self.backend.as_ref()) {
            match self.fetch_remote(backend.as_ref(), tenant_id).await {
                Ok(entries) => {
                    tracing::debug!(tenant_id, count = entries.len(), "refreshed tenant Q&A set");
                    self.knowledge.replace_tenant(tenant_id, entries);
                }
                Err(err) => {
                    tracing::warn!(tenant_id, error = %err, "falling back to local Q&A search");
                }
            }
        }

        self.knowledge.resolve_local(query, tenant_id)
    }

    async fn fetch_remote(
        &self,
        backend: &dyn QaBackend,
        tenant_id: &str,
    ) -> Result<Vec<QaEntry>, ChatError> {
        tokio::time::timeout(self.remote_timeout, backend.fetch_tenant_qas(tenant_id))
            .await
            .map_err(|_| {
                ChatError::remote(format!(
                    "timed out after {} ms",
                    self.remote_timeout.as_millis()
                ))
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn knowledge() -> KnowledgeBase {
        let mut entries = default_entries();
        entries.push(
            QaEntry::new("What are your business hours?", "We are open 24/7.").for_tenant("t1"),
        );
        entries.push(QaEntry::new("Do you ship abroad?", "Only within the EU.").for_tenant("t1"));
        KnowledgeBase::new(entries)
    }

    #[test]
    fn exact_question_returns_its_answer() {
        let kb = KnowledgeBase::with_defaults();
        for entry in default_entries() {
            assert_eq!(kb.resolve_local(&entry.question, None), Some(entry.answer));
        }
    }

    #[test]
    fn matching_ignores_case() {
        let kb = KnowledgeBase::with_defaults();
        assert_eq!(
            kb.resolve_local("WHAT ARE YOUR BUSINESS HOURS", None).as_deref(),
            Some("Our business hours are Monday to Friday, 9 AM to 6 PM (EST).")
        );
    }

    #[test]
    fn containment_works_both_ways() {
        assert!(question_matches("What are your business hours?", "business hours"));
        assert!(question_matches(
            "free trial",
            "hey, do you have a FREE TRIAL for new accounts?"
        ));
        assert!(!question_matches("free trial", "paid plans"));
    }

    #[test]
    fn blank_input_never_matches() {
        assert!(!question_matches("What are your business hours?", "   "));
        assert!(!question_matches("", "anything"));
        let kb = KnowledgeBase::with_defaults();
        assert_eq!(kb.resolve_local("", None), None);
    }

    #[test]
    fn tenant_entry_wins_over_global() {
        let kb = knowledge();
        assert_eq!(
            kb.resolve_local("What are your business hours?", Some("t1")).as_deref(),
            Some("We are open 24/7.")
        );
        assert_eq!(
            kb.resolve_local("What are your business hours?", Some("other")).as_deref(),
            Some("Our business hours are Monday to Friday, 9 AM to 6 PM (EST).")
        );
    }

    #[test]
    fn tenant_miss_falls_through_to_global() {
        let kb = knowledge();
        assert!(kb.resolve_local("How do I reset my password?", Some("t1")).is_some());
        assert_eq!(kb.resolve_local("Do you ship abroad?", None), None);
    }

    #[test]
    fn unknown_query_is_no_match() {
        let kb = knowledge();
        assert_eq!(kb.resolve_local("asdfqwerty12345", Some("t1")), None);
        assert_eq!(kb.resolve_local("asdfqwerty12345", None), None);
    }

    #[test]
    fn first_entry_in_order_wins() {
        let kb = KnowledgeBase::new(vec![
            QaEntry::new("refund policy", "first"),
            QaEntry::new("refund", "second"),
        ]);
        assert_eq!(kb.lookup_global("refund").as_deref(), Some("first"));
    }

    #[test]
    fn seed_json_accepts_both_shapes() {
        let list = r#"[{ "question": "a?", "answer": "A" }, { "question": "b?", "answer": "B", "userId": "t9" }]"#;
        let kb = KnowledgeBase::from_json(list).unwrap();
        assert_eq!(kb.global_entries().len(), 1);
        assert_eq!(kb.tenant_entries("t9").len(), 1);

        let wrapped = r#"{ "qas": [{ "question": "c?", "answer": "C" }] }"#;
        let kb = KnowledgeBase::from_json(wrapped).unwrap();
        assert_eq!(kb.lookup_global("c?").as_deref(), Some("C"));

        assert!(matches!(
            KnowledgeBase::from_json("not json"),
            Err(ChatError::Seed(_))
        ));
    }

    #[test]
    fn tenant_cache_evicts_oldest_set() {
        let kb = KnowledgeBase::default().with_tenant_capacity(2);
        kb.replace_tenant("a", vec![QaEntry::new("a?", "A")]);
        kb.replace_tenant("b", vec![QaEntry::new("b?", "B")]);
        // Refreshing "a" makes "b" the oldest.
        kb.replace_tenant("a", vec![QaEntry::new("a?", "A2")]);
        kb.replace_tenant("c", vec![QaEntry::new("c?", "C")]);

        assert_eq!(kb.tenant_count(), 2);
        assert!(kb.tenant_entries("b").is_empty());
        assert_eq!(kb.lookup_tenant("a", "a?").as_deref(), Some("A2"));
        assert_eq!(kb.lookup_tenant("c", "c?").as_deref(), Some("C"));
    }

    #[test]
    fn seeded_tenants_survive_default_capacity() {
        let kb = knowledge();
        assert_eq!(kb.tenant_count(), 1);
        for i in 0..DEFAULT_TENANT_CAPACITY + 10 {
            kb.replace_tenant(&format!("remote-{i}"), Vec::new());
        }
        assert_eq!(kb.tenant_count(), DEFAULT_TENANT_CAPACITY);
    }

    #[tokio::test]
    async fn resolver_without_backend_is_local_only() {
        let resolver = AnswerResolver::new(
            Arc::new(knowledge()),
            None,
            Duration::from_millis(100),
        );
        assert_eq!(
            resolver.resolve("do you ship abroad", Some("t1")).await.as_deref(),
            Some("Only within the EU.")
        );
        assert_eq!(resolver.resolve("asdfqwerty12345", Some("t1")).await, None);
    }
}
