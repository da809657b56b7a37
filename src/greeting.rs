use minijinja::{context, Environment};

pub const DEFAULT_GREETING_TEMPLATE: &str =
    "Hi there! I'm {{ bot_name }}. How can I help you today?";

pub struct GreetingContext<'a> {
    pub bot_name: &'a str,
    pub template: Option<&'a str>,
}

pub fn render_greeting(ctx: &GreetingContext<'_>) -> String {
    let source = ctx
        .template
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(DEFAULT_GREETING_TEMPLATE);

    let mut env = Environment::new();
    if env.add_template("greeting", source).is_err() {
        tracing::warn!("greeting template failed to parse, using default greeting");
        return fallback_greeting(ctx);
    }

    let Ok(template) = env.get_template("greeting") else {
        return fallback_greeting(ctx);
    };

    match template.render(context! { bot_name => bot_name(ctx) }) {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        _ => fallback_greeting(ctx),
    }
}

fn bot_name<'a>(ctx: &GreetingContext<'a>) -> &'a str {
    if ctx.bot_name.trim().is_empty() {
        "Assistant"
    } else {
        ctx.bot_name.trim()
    }
}

fn fallback_greeting(ctx: &GreetingContext<'_>) -> String {
    format!("Hello! I'm {}. How can I help you today?", bot_name(ctx))
}
