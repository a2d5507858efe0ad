//! Interactive setup wizard behind `mashell init`.

use crate::settings::{ConfigFile, ProfileConfig, load_config_file, save_config_file};
use colored::Colorize;
use dialoguer::{Input, Password, Select, theme::ColorfulTheme};
use mashell_llm::ProviderFlavor;
use std::path::Path;

struct ProviderChoice {
    flavor: ProviderFlavor,
    label: &'static str,
}

const PROVIDERS: &[ProviderChoice] = &[
    ProviderChoice {
        flavor: ProviderFlavor::OpenAi,
        label: "openai  - OpenAI API (GPT-4o, etc.)",
    },
    ProviderChoice {
        flavor: ProviderFlavor::Azure,
        label: "azure   - Azure OpenAI Service",
    },
    ProviderChoice {
        flavor: ProviderFlavor::Ollama,
        label: "ollama  - Local Ollama (no API key needed)",
    },
];

/// Answers collected by the wizard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitAnswers {
    pub profile_name: String,
    pub profile: ProfileConfig,
}

pub fn run_init(config_path: &Path) -> Result<(), String> {
    let theme = ColorfulTheme::default();
    println!();
    println!("{}", "MaShell configuration wizard".bold().cyan());
    println!("Let's set up your AI provider.\n");

    let labels: Vec<&str> = PROVIDERS.iter().map(|choice| choice.label).collect();
    let index = Select::with_theme(&theme)
        .with_prompt("LLM provider")
        .items(&labels)
        .default(0)
        .interact()
        .map_err(prompt_error)?;
    let flavor = PROVIDERS[index].flavor;

    let url: String = match flavor.default_url() {
        Some(preset) => Input::<String>::with_theme(&theme)
            .with_prompt("API URL")
            .default(preset.to_string())
            .interact_text(),
        None => Input::<String>::with_theme(&theme)
            .with_prompt("Azure OpenAI endpoint (https://your-resource.openai.azure.com/)")
            .interact_text(),
    }
    .map_err(prompt_error)?;

    let key = if flavor.requires_key() {
        let key = Password::with_theme(&theme)
            .with_prompt("API key (or ${VAR} to read it from the environment)")
            .allow_empty_password(true)
            .interact()
            .map_err(prompt_error)?;
        Some(key.trim().to_string()).filter(|key| !key.is_empty())
    } else {
        println!("  {}", "No API key needed for local models.".dimmed());
        None
    };

    let model: String = match flavor.default_model() {
        Some(preset) => Input::<String>::with_theme(&theme)
            .with_prompt("Model name")
            .default(preset.to_string())
            .interact_text(),
        None => Input::<String>::with_theme(&theme)
            .with_prompt("Deployment name")
            .interact_text(),
    }
    .map_err(prompt_error)?;

    let profile_name: String = Input::<String>::with_theme(&theme)
        .with_prompt("Profile name")
        .default(flavor.as_str().to_string())
        .interact_text()
        .map_err(prompt_error)?;

    let answers = InitAnswers {
        profile_name,
        profile: ProfileConfig {
            provider: Some(flavor.as_str().to_string()),
            url: Some(url.trim().to_string()),
            key,
            model: Some(model.trim().to_string()),
        },
    };
    save_answers(config_path, &answers).map_err(|error| error.to_string())?;

    println!();
    println!("{}", "Configuration saved.".bold().green());
    println!("  Config file: {}", config_path.display().to_string().dimmed());
    println!("  Profile: {}", answers.profile_name.bold());
    println!();
    println!(
        "  Try it: {}",
        format!("mashell --profile {} \"your prompt here\"", answers.profile_name).cyan()
    );
    Ok(())
}

/// Merges the wizard's profile into the config file, keeping everything else.
pub fn save_answers(
    config_path: &Path,
    answers: &InitAnswers,
) -> Result<ConfigFile, crate::settings::SettingsError> {
    let mut config = load_config_file(config_path)?.unwrap_or_else(seeded_config);
    config.upsert_profile(answers.profile_name.clone(), answers.profile.clone());
    save_config_file(config_path, &config)?;
    Ok(config)
}

fn seeded_config() -> ConfigFile {
    let mut config = ConfigFile::default();
    config.permissions.always_ask = vec![
        "execute_command".to_string(),
        "run_background".to_string(),
    ];
    config
}

fn prompt_error(error: dialoguer::Error) -> String {
    format!("setup cancelled: {error}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn answers(name: &str, model: &str) -> InitAnswers {
        InitAnswers {
            profile_name: name.to_string(),
            profile: ProfileConfig {
                provider: Some("ollama".to_string()),
                url: Some("http://localhost:11434".to_string()),
                key: None,
                model: Some(model.to_string()),
            },
        }
    }

    #[test]
    fn first_save_seeds_permissions_and_default_profile() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join(".mashell").join("config.yaml");

        let config = save_answers(&path, &answers("local", "llama3")).expect("save");

        assert_eq!(config.default.as_deref(), Some("local"));
        assert_eq!(
            config.permissions.always_ask,
            vec!["execute_command".to_string(), "run_background".to_string()]
        );
        assert!(path.exists());
    }

    #[test]
    fn later_saves_update_profiles_and_keep_the_rest() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        save_answers(&path, &answers("local", "llama3")).expect("first save");
        save_answers(&path, &answers("second", "phi3")).expect("second save");
        let config = save_answers(&path, &answers("local", "qwen2.5:14b")).expect("update");

        assert_eq!(config.default.as_deref(), Some("local"));
        assert_eq!(config.profiles.len(), 2);
        assert_eq!(
            config.profiles["local"].model.as_deref(),
            Some("qwen2.5:14b")
        );
        let reloaded = load_config_file(&path).expect("load").expect("exists");
        assert_eq!(reloaded, config);
    }
}
