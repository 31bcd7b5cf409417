//! podpipe CLI - run local commands, exec into pods, and forward pod ports.
//!
//! This is the main binary entry point. See the `podpipe` library for the
//! process and transport machinery.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use podpipe::{ClusterClient, Config, ExecOptions, LocalCommand, Process, ProcessError, ProcessStdin};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Exit code used when the user interrupts a command.
const INTERRUPTED_EXIT_CODE: i32 = 130;

// CLI
#[derive(Parser)]
#[command(name = "podpipe")]
#[command(version)]
#[command(about = "Drive local and in-container processes over one channel API")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a local program and stream its output line by line
    Run {
        /// Program to launch
        program: String,
        /// Arguments passed to the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run a command inside a pod
    Exec {
        /// Pod name
        pod: String,
        /// Container name (defaults to the pod's only container)
        #[arg(short, long)]
        container: Option<String>,
        /// Forward local standard input to the command
        ///
        /// The exec channel protocol has no end-of-input signal: when local
        /// input ends the session is closed, so output written after that and
        /// the exit status may be lost (reported as exit code -1).
        #[arg(long)]
        stdin: bool,
        /// Command and arguments
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Forward a local port to a port in a pod
    Forward {
        /// Pod name
        pod: String,
        /// Port inside the pod
        remote_port: u16,
        /// Local port to listen on (defaults to the remote port)
        #[arg(long)]
        local_port: Option<u16>,
    },
    /// Print the effective configuration
    Config,
}

fn init_logging() -> Result<()> {
    // PODPIPE_LOG wins over RUST_LOG; both fall back to "warn".
    let filter = std::env::var("PODPIPE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "warn".to_string());

    let mut builder = env_logger::Builder::new();
    builder.parse_filters(&filter).format_timestamp_secs();
    if let Ok(path) = std::env::var("PODPIPE_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.init();
    Ok(())
}

/// Cancel `token` on the first Ctrl-C.
fn cancel_on_interrupt(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted, cancelling");
            token.cancel();
        }
    });
}

/// Map a finished (or interrupted) session to the CLI's exit code.
async fn finish(mut process: Process, outcome: podpipe::Result<i32>) -> Result<i32> {
    process.dispose().await;
    match outcome {
        Ok(code) => Ok(code),
        Err(ProcessError::Cancelled) => Ok(INTERRUPTED_EXIT_CODE),
        Err(e) => Err(e.into()),
    }
}

async fn run_local(program: String, args: Vec<String>, cancel: CancellationToken) -> Result<i32> {
    let mut process = LocalCommand::new(&program)
        .args(args)
        .spawn()
        .with_context(|| format!("Failed to start {program}"))?;
    process.close_stdin().await?;

    let outcome = async {
        let mut lines = process.lines(true, true);
        while let Some(line) = lines.next_line(&cancel).await? {
            if line.is_error() {
                eprintln!("{}", line.text);
            } else {
                println!("{}", line.text);
            }
        }
        process.exit_code()
    }
    .await;
    finish(process, outcome).await
}

/// Copy local stdin into the remote command until EOF or cancellation.
async fn pump_stdin(mut stdin: ProcessStdin, buffer_size: usize, cancel: CancellationToken) {
    let mut local = tokio::io::stdin();
    let mut buf = vec![0u8; buffer_size.max(1)];
    loop {
        let n = tokio::select! {
            () = cancel.cancelled() => return,
            read = local.read(&mut buf) => match read {
                Ok(n) => n,
                Err(e) => {
                    log::warn!("Reading local stdin failed: {e}");
                    0
                }
            },
        };
        if n == 0 {
            if let Err(e) = stdin.close().await {
                log::debug!("Closing remote stdin failed: {e}");
            }
            return;
        }
        if let Err(e) = stdin.write(&buf[..n], &cancel).await {
            log::warn!("Forwarding stdin failed: {e}");
            return;
        }
    }
}

async fn run_exec(
    client: &ClusterClient,
    pod: &str,
    container: Option<&str>,
    forward_stdin: bool,
    command: &[String],
    cancel: CancellationToken,
) -> Result<i32> {
    let mut process = client
        .exec(pod, container, command, ExecOptions { stdin: forward_stdin })
        .await
        .with_context(|| format!("Failed to exec in pod {pod}"))?;

    let stdin_task = if forward_stdin {
        process.take_stdin().map(|stdin| {
            tokio::spawn(pump_stdin(
                stdin,
                client.config().read_buffer_size,
                cancel.child_token(),
            ))
        })
    } else {
        None
    };

    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    let outcome = process
        .read_to_end_into(&mut stdout, &mut stderr, &cancel)
        .await;
    if let Some(task) = stdin_task {
        task.abort();
    }
    finish(process, outcome).await
}

async fn run_forward(
    client: &ClusterClient,
    pod: &str,
    remote_port: u16,
    local_port: Option<u16>,
    cancel: CancellationToken,
) -> Result<()> {
    let local_port = local_port.unwrap_or(remote_port);
    let listener = TcpListener::bind(("127.0.0.1", local_port))
        .await
        .with_context(|| format!("Failed to listen on 127.0.0.1:{local_port}"))?;
    eprintln!("Forwarding 127.0.0.1:{local_port} -> {pod}:{remote_port}");

    podpipe::port_forward::serve_local(
        listener,
        move || client.port_forward(pod, remote_port),
        cancel,
    )
    .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    cancel_on_interrupt(&cancel);

    let code = match cli.command {
        Commands::Run { program, args } => run_local(program, args, cancel).await?,
        Commands::Exec {
            pod,
            container,
            stdin,
            command,
        } => {
            let client = ClusterClient::new(Config::load()?);
            run_exec(&client, &pod, container.as_deref(), stdin, &command, cancel).await?
        }
        Commands::Forward {
            pod,
            remote_port,
            local_port,
        } => {
            let client = ClusterClient::new(Config::load()?);
            run_forward(&client, &pod, remote_port, local_port, cancel).await?;
            0
        }
        Commands::Config => {
            let config = Config::load()?;
            println!("{}", config.to_display_json()?);
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_exec_stdin_help_warns_about_session_close() {
        let mut cli = Cli::command();
        let exec = cli.find_subcommand_mut("exec").unwrap();
        let stdin = exec
            .get_arguments()
            .find(|arg| arg.get_id() == "stdin")
            .unwrap();
        let help = stdin.get_long_help().unwrap().to_string();
        assert!(help.contains("no end-of-input signal"));
    }

    #[test]
    fn test_exec_command_after_separator() {
        let cli = Cli::try_parse_from([
            "podpipe", "exec", "web-0", "-c", "app", "--stdin", "--", "sh", "-c", "ls -la",
        ])
        .unwrap();
        match cli.command {
            Commands::Exec {
                pod,
                container,
                stdin,
                command,
            } => {
                assert_eq!(pod, "web-0");
                assert_eq!(container.as_deref(), Some("app"));
                assert!(stdin);
                assert_eq!(command, ["sh", "-c", "ls -la"]);
            }
            _ => panic!("expected exec"),
        }
    }

    #[test]
    fn test_run_passes_hyphen_args_through() {
        let cli = Cli::try_parse_from(["podpipe", "run", "ls", "-la", "/tmp"]).unwrap();
        match cli.command {
            Commands::Run { program, args } => {
                assert_eq!(program, "ls");
                assert_eq!(args, ["-la", "/tmp"]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_forward_defaults_local_port() {
        let cli = Cli::try_parse_from(["podpipe", "forward", "db-0", "5432"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Forward {
                remote_port: 5432,
                local_port: None,
                ..
            }
        ));
    }

    #[test]
    fn test_exec_requires_command() {
        assert!(Cli::try_parse_from(["podpipe", "exec", "web-0"]).is_err());
    }
}
