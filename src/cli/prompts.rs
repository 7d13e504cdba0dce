//! Interactive terminal prompts

use std::io::{self, BufRead, Write};

use crate::core::errors::Result;
use crate::core::registry::ProviderRegistry;
use crate::processors::orchestrator::{is_affirmative, Confirmation};

/// Asks the user on the terminal
pub struct StdinConfirm;

impl Confirmation for StdinConfirm {
    fn confirm(&mut self, prompt: &str) -> bool {
        let stdin = io::stdin();
        let stdout = io::stdout();
        ask_yes_no(&mut stdin.lock(), &mut stdout.lock(), prompt)
    }
}

/// Anything other than y/yes, including a read error, counts as no
pub fn ask_yes_no<R: BufRead, W: Write>(input: &mut R, output: &mut W, prompt: &str) -> bool {
    if write!(output, "{} ", prompt).and_then(|_| output.flush()).is_err() {
        return false;
    }
    let mut answer = String::new();
    match input.read_line(&mut answer) {
        Ok(_) => is_affirmative(&answer),
        Err(_) => false,
    }
}

/// Pick one of `choices` by 1-based number; empty or invalid input keeps `default`
pub fn choose<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    title: &str,
    choices: &[(String, String)],
    default: usize,
) -> io::Result<usize> {
    writeln!(output, "\n{}:", title)?;
    for (i, (id, label)) in choices.iter().enumerate() {
        let marker = if i == default { " (default)" } else { "" };
        writeln!(output, "  {}. {} - {}{}", i + 1, id, label, marker)?;
    }
    write!(output, "Select [1-{}], Enter for default: ", choices.len())?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    let answer = answer.trim();
    if answer.is_empty() {
        return Ok(default);
    }

    match answer.parse::<usize>() {
        Ok(n) if (1..=choices.len()).contains(&n) => Ok(n - 1),
        _ => {
            writeln!(output, "Invalid choice, using default")?;
            Ok(default)
        }
    }
}

/// Let the user pick a provider id from the catalog
pub fn select_provider<R: BufRead, W: Write>(registry: &ProviderRegistry, input: &mut R, output: &mut W) -> Result<String> {
    let providers = registry.list_providers();
    let default_id = registry.get_default_provider()?;
    let default = providers.iter().position(|(id, _)| *id == default_id).unwrap_or(0);

    let index = choose(input, output, "Available providers", &providers, default)?;
    Ok(providers[index].0.clone())
}

/// Let the user pick a model of `provider`; None when the provider lists no models
pub fn select_model<R: BufRead, W: Write>(
    registry: &ProviderRegistry,
    provider: &str,
    input: &mut R,
    output: &mut W,
) -> Result<Option<String>> {
    let models = registry.get_provider_models(provider)?;
    if models.is_empty() {
        return Ok(None);
    }

    let default_model = registry.get_default_model(provider)?;
    let default = default_model
        .and_then(|d| models.iter().position(|m| m.id == d))
        .unwrap_or(0);
    let choices: Vec<(String, String)> = models
        .iter()
        .map(|m| (m.id.clone(), m.display_name().to_string()))
        .collect();

    let index = choose(input, output, &format!("Models of {}", provider), &choices, default)?;
    Ok(Some(choices[index].0.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn registry() -> ProviderRegistry {
        ProviderRegistry::from_json(
            r#"{
                "default_provider": "b",
                "providers": {
                    "a": {"name": "Alpha", "api_url": "http://a", "models": [{"id": "a-1"}]},
                    "b": {"name": "Beta", "api_url": "http://b", "default_model": "b-2",
                          "models": [{"id": "b-1"}, {"id": "b-2", "name": "Beta Two"}]}
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_yes_no_prompt() {
        let mut out = Vec::new();
        assert!(ask_yes_no(&mut Cursor::new("yes\n"), &mut out, "Go?"));
        assert!(!ask_yes_no(&mut Cursor::new("\n"), &mut out, "Go?"));
        assert!(!ask_yes_no(&mut Cursor::new(""), &mut out, "Go?"));
        assert!(String::from_utf8(out).unwrap().starts_with("Go? "));
    }

    #[test]
    fn test_empty_input_selects_default_provider() {
        let mut out = Vec::new();
        let id = select_provider(&registry(), &mut Cursor::new("\n"), &mut out).unwrap();
        assert_eq!(id, "b");
        assert!(String::from_utf8(out).unwrap().contains("2. b - Beta (default)"));
    }

    #[test]
    fn test_numbered_and_invalid_choices() {
        let mut out = Vec::new();
        assert_eq!(select_provider(&registry(), &mut Cursor::new("1\n"), &mut out).unwrap(), "a");
        assert_eq!(select_provider(&registry(), &mut Cursor::new("9\n"), &mut out).unwrap(), "b");
        assert_eq!(select_provider(&registry(), &mut Cursor::new("abc\n"), &mut out).unwrap(), "b");
    }

    #[test]
    fn test_model_selection_defaults_to_provider_default() {
        let mut out = Vec::new();
        let model = select_model(&registry(), "b", &mut Cursor::new("\n"), &mut out).unwrap();
        assert_eq!(model.as_deref(), Some("b-2"));

        let model = select_model(&registry(), "b", &mut Cursor::new("1\n"), &mut out).unwrap();
        assert_eq!(model.as_deref(), Some("b-1"));
    }
}
