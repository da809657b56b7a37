use rand::seq::SliceRandom;
use rand::Rng;

pub const FALLBACK_RESPONSES: [&str; 5] = [
    "I'm not sure about that yet, but I'm still learning. Could you try rephrasing your question?",
    "Sorry, I don't have an answer for that right now. I've noted your question so it can be added soon.",
    "That's a great question! I don't know the answer yet, but the team will be able to help.",
    "I haven't learned about that yet. Please try asking in a different way.",
    "I'm afraid I can't answer that one at the moment. Is there anything else I can help with?",
];

/// Picks one canned reply for questions nothing in the knowledge base matched.
pub fn fallback<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    FALLBACK_RESPONSES
        .choose(rng)
        .copied()
        .unwrap_or(FALLBACK_RESPONSES[0])
}
