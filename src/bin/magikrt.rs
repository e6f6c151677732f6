//! magikrt - Volume plugin and container log CLI
//!
//! Drives Docker-compatible volume plugins over their Unix sockets and
//! prints CRI-format container logs.
//!
//! ## Usage
//!
//! ```sh
//! magikrt volume create <plugin> <name> [-o key=value]...
//! magikrt volume mount <plugin> <name> <id>
//! magikrt plugins [dir]
//! magikrt logs <path> [--follow] [--tail N]
//! ```
//!
//! ## Plugin Selection
//!
//! `<plugin>` is either an absolute socket path or a plugin name, resolved
//! to `<dir>/<name>.sock`. The directory defaults to `/run/docker/plugins`
//! and can be overridden with `MAGIKRT_PLUGIN_DIR`.

use magikrt::{
    ContainerStatus, CreateRequest, GetRequest, LogOptions, MountRequest, PathRequest,
    PluginRegistry, RemoveRequest, UnmountRequest, VolumePlugin, read_logs,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

// =============================================================================
// Constants
// =============================================================================

/// Overrides the plugin socket directory.
const PLUGIN_DIR_ENV: &str = "MAGIKRT_PLUGIN_DIR";

/// Enables debug logging when set.
const DEBUG_ENV: &str = "MAGIKRT_DEBUG";

// =============================================================================
// CLI Parsing
// =============================================================================

#[derive(Debug)]
enum VolumeCommand {
    Create {
        name: String,
        options: Vec<(String, String)>,
    },
    List,
    Inspect {
        name: String,
    },
    Remove {
        name: String,
    },
    Path {
        name: String,
    },
    Mount {
        name: String,
        id: String,
    },
    Unmount {
        name: String,
        id: String,
    },
    Capabilities,
}

#[derive(Debug)]
enum Command {
    Volume {
        plugin: String,
        command: VolumeCommand,
    },
    Plugins {
        dir: Option<PathBuf>,
    },
    Logs {
        path: PathBuf,
        options: LogOptions,
    },
    Version,
    Help,
}

fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        return Ok(Command::Help);
    }

    match args[1].as_str() {
        "volume" => parse_volume(&args[2..]),
        "plugins" => Ok(Command::Plugins {
            dir: args.get(2).map(PathBuf::from),
        }),
        "logs" => parse_logs(&args[2..]),
        "version" | "--version" | "-v" => Ok(Command::Version),
        "help" | "--help" | "-h" => Ok(Command::Help),
        unknown => Err(format!("unknown command: {}", unknown)),
    }
}

fn parse_volume(args: &[String]) -> Result<Command, String> {
    let Some(sub) = args.first() else {
        return Err("volume requires a subcommand".to_string());
    };
    let Some(plugin) = args.get(1).cloned() else {
        return Err(format!("volume {} requires <plugin>", sub));
    };
    let name = || {
        args.get(2)
            .cloned()
            .ok_or_else(|| format!("volume {} requires <name>", sub))
    };
    let id = || {
        args.get(3)
            .cloned()
            .ok_or_else(|| format!("volume {} requires <id>", sub))
    };

    let command = match sub.as_str() {
        "create" => {
            let name = name()?;
            let mut options = Vec::new();
            let mut i = 3;
            while i < args.len() {
                match args[i].as_str() {
                    "--opt" | "-o" => {
                        let Some(opt) = args.get(i + 1) else {
                            return Err("--opt requires key=value".to_string());
                        };
                        let Some((key, value)) = opt.split_once('=') else {
                            return Err(format!("invalid option {}, expected key=value", opt));
                        };
                        options.push((key.to_string(), value.to_string()));
                        i += 2;
                    }
                    _ => i += 1,
                }
            }
            VolumeCommand::Create { name, options }
        }
        "ls" | "list" => VolumeCommand::List,
        "inspect" => VolumeCommand::Inspect { name: name()? },
        "rm" | "remove" => VolumeCommand::Remove { name: name()? },
        "path" => VolumeCommand::Path { name: name()? },
        "mount" => VolumeCommand::Mount {
            name: name()?,
            id: id()?,
        },
        "unmount" => VolumeCommand::Unmount {
            name: name()?,
            id: id()?,
        },
        "caps" | "capabilities" => VolumeCommand::Capabilities,
        unknown => return Err(format!("unknown volume command: {}", unknown)),
    };

    Ok(Command::Volume { plugin, command })
}

fn parse_logs(args: &[String]) -> Result<Command, String> {
    let Some(path) = args.first() else {
        return Err("logs requires <path>".to_string());
    };
    let mut options = LogOptions::default();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--follow" | "-f" => {
                options.follow = true;
                i += 1;
            }
            "--timestamps" | "-t" => {
                options.timestamps = true;
                i += 1;
            }
            "--details" => {
                options.details = true;
                i += 1;
            }
            "--tail" | "-n" => {
                let value = args.get(i + 1).ok_or("--tail requires a count")?;
                options.tail = value
                    .parse::<usize>()
                    .map_err(|e| format!("invalid --tail {}: {}", value, e))?;
                i += 2;
            }
            "--since" => {
                let value = args.get(i + 1).ok_or("--since requires a timestamp")?;
                let since = chrono::DateTime::parse_from_rfc3339(value)
                    .map_err(|e| format!("invalid --since {}: {}", value, e))?;
                options.since = Some(since.with_timezone(&chrono::Utc));
                i += 2;
            }
            "--limit-bytes" => {
                let value = args.get(i + 1).ok_or("--limit-bytes requires a count")?;
                let limit = value
                    .parse::<u64>()
                    .map_err(|e| format!("invalid --limit-bytes {}: {}", value, e))?;
                options.limit_bytes = Some(limit);
                i += 2;
            }
            other => return Err(format!("unknown logs option: {}", other)),
        }
    }

    Ok(Command::Logs {
        path: PathBuf::from(path),
        options,
    })
}

// =============================================================================
// Command Implementations
// =============================================================================

fn registry() -> PluginRegistry {
    match std::env::var_os(PLUGIN_DIR_ENV) {
        Some(dir) => PluginRegistry::new().with_plugin_dir(dir),
        None => PluginRegistry::new(),
    }
}

async fn resolve(registry: &PluginRegistry, plugin: &str) -> Result<Arc<VolumePlugin>, String> {
    registry.lookup(plugin).await.map_err(|e| e.to_string())
}

async fn cmd_volume(plugin: String, command: VolumeCommand) -> Result<(), String> {
    let registry = registry();
    let plugin = resolve(&registry, &plugin).await?;

    match command {
        VolumeCommand::Create { name, options } => {
            let req = options
                .into_iter()
                .fold(CreateRequest::new(&name), |req, (k, v)| req.with_option(k, v));
            plugin.create_volume(&req).await.map_err(|e| e.to_string())?;
            println!("{}", name);
        }
        VolumeCommand::List => {
            let volumes = plugin.list_volumes().await.map_err(|e| e.to_string())?;
            println!("NAME\tMOUNTPOINT");
            for volume in volumes {
                println!("{}\t{}", volume.name, volume.mountpoint);
            }
        }
        VolumeCommand::Inspect { name } => {
            let volume = plugin
                .get_volume(&GetRequest::new(&name))
                .await
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("no such volume: {}", name))?;
            let json =
                serde_json::to_string_pretty(&volume).map_err(|e| format!("serialize: {}", e))?;
            println!("{}", json);
        }
        VolumeCommand::Remove { name } => {
            plugin
                .remove_volume(&RemoveRequest::new(&name))
                .await
                .map_err(|e| e.to_string())?;
            println!("{}", name);
        }
        VolumeCommand::Path { name } => {
            let path = plugin
                .get_volume_path(&PathRequest::new(&name))
                .await
                .map_err(|e| e.to_string())?;
            println!("{}", path);
        }
        VolumeCommand::Mount { name, id } => {
            let path = plugin
                .mount_volume(&MountRequest::new(name, id))
                .await
                .map_err(|e| e.to_string())?;
            println!("{}", path);
        }
        VolumeCommand::Unmount { name, id } => {
            plugin
                .unmount_volume(&UnmountRequest::new(name, id))
                .await
                .map_err(|e| e.to_string())?;
        }
        VolumeCommand::Capabilities => {
            let caps = plugin.capabilities().await.map_err(|e| e.to_string())?;
            println!("scope: {}", caps.scope);
        }
    }

    Ok(())
}

async fn cmd_plugins(dir: Option<PathBuf>) -> Result<(), String> {
    let registry = registry();
    let dir = dir.unwrap_or_else(|| registry.plugin_dir().to_path_buf());
    let names = registry.discover(&dir).await.map_err(|e| e.to_string())?;

    println!("NAME\tSOCKET");
    for name in names {
        println!("{}\t{}", name, registry.socket_path_for(&name).display());
    }
    Ok(())
}

async fn cmd_logs(path: PathBuf, options: LogOptions) -> Result<(), String> {
    let cancel = CancellationToken::new();

    // The CLI has no container to watch; follow runs until interrupted.
    let (_state_tx, state) = watch::channel(ContainerStatus::Running);

    if options.follow {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    read_logs(
        &path,
        &state,
        &options,
        tokio::io::stdout(),
        tokio::io::stderr(),
        &cancel,
    )
    .await
    .map_err(|e| e.to_string())
}

fn cmd_version() {
    println!("magikrt version {}", env!("CARGO_PKG_VERSION"));
}

fn cmd_help() {
    println!(
        r#"magikrt - Volume plugin client and container log reader

USAGE:
    magikrt <command> [options]

COMMANDS:
    volume create <plugin> <name> [-o k=v]  Create a volume
    volume ls <plugin>                      List volumes
    volume inspect <plugin> <name>          Show a volume (JSON)
    volume rm <plugin> <name>               Remove a volume
    volume path <plugin> <name>             Show a volume's host path
    volume mount <plugin> <name> <id>       Mount a volume for <id>
    volume unmount <plugin> <name> <id>     Release <id>'s mount
    volume caps <plugin>                    Show driver capabilities
    plugins [dir]                           Discover volume plugins
    logs <path> [options]                   Print a CRI container log
    version                                 Show version info
    help                                    Show this help

LOGS OPTIONS:
    --follow, -f           Keep printing new lines until interrupted
    --tail, -n <count>     Only the last <count> lines (0 = all)
    --since <rfc3339>      Skip records older than this
    --timestamps, -t       Prefix records with their timestamp
    --limit-bytes <n>      Stop after <n> bytes of output

ENVIRONMENT:
    MAGIKRT_PLUGIN_DIR     Plugin socket directory (default: /run/docker/plugins)
    MAGIKRT_DEBUG          Enable debug logging

EXAMPLES:
    magikrt volume create local-persist data -o mountpoint=/data
    magikrt volume mount /run/docker/plugins/lp.sock data ctr1
    magikrt logs /var/log/pods/web/0.log --tail 20 --follow
"#
    );
}

// =============================================================================
// Main
// =============================================================================

fn init_tracing() -> Result<(), String> {
    let level = if std::env::var_os(DEBUG_ENV).is_some() {
        Level::DEBUG
    } else {
        Level::INFO
    };

    // Diagnostics on stderr keep stdout for command output.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("failed to set tracing subscriber: {}", e))
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = init_tracing() {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }

    match parse_args() {
        Ok(cmd) => {
            let result = match cmd {
                Command::Volume { plugin, command } => cmd_volume(plugin, command).await,
                Command::Plugins { dir } => cmd_plugins(dir).await,
                Command::Logs { path, options } => cmd_logs(path, options).await,
                Command::Version => {
                    cmd_version();
                    Ok(())
                }
                Command::Help => {
                    cmd_help();
                    Ok(())
                }
            };

            match result {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("error: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Err(e) => {
            eprintln!("error: {}", e);
            cmd_help();
            ExitCode::FAILURE
        }
    }
}
