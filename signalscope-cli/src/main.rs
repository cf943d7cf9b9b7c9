// Copyright 2025 Signalscope (https://github.com/signalscope)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Signalscope CLI
//!
//! Operator surface for the plugin registry: install, inspect, disable,
//! and test-run plugins without starting the desktop application.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use signalscope_core::{ExecutionContext, SeriesFrame};
use signalscope_plugins::{PluginRegistry, RegistryConfig};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::Level;

#[derive(Parser)]
#[command(name = "signalscope")]
#[command(about = "Signalscope - plugin registry operations", long_about = None)]
struct Cli {
    /// Plugins directory
    #[arg(short, long, default_value = "./plugins")]
    plugins_dir: PathBuf,

    /// Verbose mode
    #[arg(short, long)]
    verbose: bool,

    /// Output as JSON (machine-readable)
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a plugin from a directory
    Install {
        /// Path to the plugin directory
        path: PathBuf,
    },

    /// List all discovered plugins
    List,

    /// Show details about a plugin
    Info {
        /// Plugin ID
        plugin_id: String,
    },

    /// Disable a failed plugin
    Disable {
        /// Plugin ID
        plugin_id: String,
    },

    /// Re-enable a disabled plugin
    Enable {
        /// Plugin ID
        plugin_id: String,
    },

    /// Load a plugin and execute it against a series read from a JSON file
    Run {
        /// Plugin ID
        plugin_id: String,

        /// Path to a JSON-encoded series
        #[arg(long)]
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let registry = PluginRegistry::new(RegistryConfig::default());
    if cli.plugins_dir.exists() {
        registry
            .discover(&cli.plugins_dir)
            .context("Failed to scan plugins directory")?;
    }

    match &cli.command {
        Commands::Install { path } => {
            println!("Installing plugin from {}...", path.display());
            let installed = install_plugin(path, &cli.plugins_dir)?;
            let discovered = registry
                .discover(&cli.plugins_dir)
                .context("Failed to re-scan plugins directory")?;
            match discovered.iter().find(|p| p.path == installed) {
                Some(info) => {
                    println!("✓ Installed {} ({:?})", info.id, info.state);
                    if let Some(error) = &info.last_error {
                        println!("  Note: {}", error);
                    }
                }
                None => {
                    eprintln!("✗ Installed directory contains no plugin manifest");
                    std::process::exit(1);
                }
            }
        }

        Commands::List => {
            let plugins = registry.list_plugins();
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&plugins)?);
            } else if plugins.is_empty() {
                println!("No plugins installed.");
                println!("\nPlugins directory: {}", cli.plugins_dir.display());
            } else {
                println!("Discovered Plugins ({}):", plugins.len());
                println!("{:-<60}", "");
                for plugin in &plugins {
                    let version = plugin
                        .manifest
                        .as_ref()
                        .map(|m| m.plugin.version.clone())
                        .unwrap_or_else(|| "?".to_string());
                    println!("{} v{} [{}]", plugin.id, version, plugin.state);
                    if let Some(error) = &plugin.last_error {
                        println!("    Reason: {}", error);
                    }
                }
            }
        }

        Commands::Info { plugin_id } => match registry.get_plugin(plugin_id) {
            Some(plugin) => {
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&plugin)?);
                } else {
                    println!("Plugin: {}", plugin.id);
                    println!("{:-<40}", "");
                    println!("State:       {}", plugin.state);
                    println!("Path:        {}", plugin.path.display());
                    println!("Discovered:  {}", plugin.discovered_at);
                    println!("Loads:       {}", plugin.load_count);
                    println!("Failures:    {}", plugin.failure_count);
                    if plugin.disable_recommended {
                        println!("Recommendation: disable");
                    }
                    if let Some(manifest) = &plugin.manifest {
                        println!("Version:     {}", manifest.plugin.version);
                        println!("Capability:  {}", manifest.capability());
                        println!("Host range:  {}", manifest.plugin.host_version_range);
                        println!("Entry:       {}", manifest.plugin.entry_point);
                    }
                    if let Some(error) = &plugin.last_error {
                        println!("Last error:  {}", error);
                    }
                }
            }
            None => {
                eprintln!("✗ Plugin not found: {}", plugin_id);
                std::process::exit(1);
            }
        },

        Commands::Disable { plugin_id } => match registry.disable(plugin_id) {
            Ok(()) => println!("✓ Disabled {}", plugin_id),
            Err(e) => {
                eprintln!("✗ Failed to disable: {}", e);
                std::process::exit(1);
            }
        },

        Commands::Enable { plugin_id } => match registry.enable(plugin_id) {
            Ok(()) => println!("✓ Enabled {}", plugin_id),
            Err(e) => {
                eprintln!("✗ Failed to enable: {}", e);
                std::process::exit(1);
            }
        },

        Commands::Run { plugin_id, input } => {
            let series: SeriesFrame = serde_json::from_str(
                &fs::read_to_string(input)
                    .with_context(|| format!("Failed to read {}", input.display()))?,
            )
            .context("Failed to parse input series")?;

            if let Err(e) = registry.load(plugin_id) {
                eprintln!("✗ Load failed: {}", e);
                std::process::exit(1);
            }
            match registry.execute(plugin_id, &ExecutionContext::new(series)) {
                Ok(output) => {
                    if cli.json {
                        println!("{}", serde_json::to_string_pretty(&output.payload)?);
                    } else {
                        println!("✓ {} completed", plugin_id);
                        println!("{}", serde_json::to_string_pretty(&output.payload)?);
                    }
                }
                Err(e) => {
                    eprintln!("✗ Execution failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

/// Copies a plugin directory into the plugins directory.
fn install_plugin(source: &Path, plugins_dir: &Path) -> Result<PathBuf> {
    let name = source
        .file_name()
        .with_context(|| format!("Not a plugin directory: {}", source.display()))?;
    let target = plugins_dir.join(name);
    copy_dir(source, &target)
        .with_context(|| format!("Failed to copy plugin into {}", target.display()))?;
    Ok(target)
}

fn copy_dir(source: &Path, target: &Path) -> std::io::Result<()> {
    fs::create_dir_all(target)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let to = target.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &to)?;
        } else {
            fs::copy(entry.path(), &to)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_dir_preserves_layout() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("plugin");
        fs::create_dir_all(source.join("assets")).unwrap();
        fs::write(source.join("signalscope-plugin.toml"), "stub").unwrap();
        fs::write(source.join("assets").join("icon.svg"), "<svg/>").unwrap();

        let plugins_dir = tmp.path().join("plugins");
        let installed = install_plugin(&source, &plugins_dir).unwrap();

        assert_eq!(installed, plugins_dir.join("plugin"));
        assert!(installed.join("signalscope-plugin.toml").exists());
        assert!(installed.join("assets").join("icon.svg").exists());
    }
}
