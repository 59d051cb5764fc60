use clap::{Parser, Subcommand};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pubgoods")]
#[command(about = "Public goods game - server and demo launcher")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server plus a scripted leader and players
    Both {
        /// Number of scripted players
        #[arg(short, long, default_value = "4")]
        bots: u32,
        #[arg(short, long, default_value = "4")]
        group_size: usize,
        #[arg(short, long, default_value = "9001")]
        port: u16,
    },
    /// Run only the server
    Server {
        #[arg(short, long, default_value = "9001")]
        port: u16,
    },
    /// Run scripted players against a running server
    Bots {
        #[arg(short, long, default_value = "4")]
        bots: u32,
        /// Room to join; the first open room otherwise
        #[arg(short, long)]
        room: Option<String>,
        #[arg(short, long, default_value = "9001")]
        port: u16,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Both {
            bots,
            group_size,
            port,
        } => run_both(bots, group_size, port),
        Commands::Server { port } => run_server(port),
        Commands::Bots { bots, room, port } => run_bots(bots, room, port),
    }
}

fn run_both(bots: u32, group_size: usize, port: u16) {
    println!("Starting server on port {} with {} scripted players", port, bots);

    let server_handle = thread::spawn(move || run_server(port));
    thread::sleep(Duration::from_millis(1500));

    let leader = spawn_demo(&[
        "--lead".into(),
        "--name".into(),
        "Moderator".into(),
        "--group-size".into(),
        group_size.to_string(),
        "--url".into(),
        ws_url(port),
    ]);
    thread::sleep(Duration::from_millis(1000));
    run_bots(bots, None, port);

    if let Some(mut child) = leader {
        let _ = child.wait();
    }
    println!("Demo finished. Server still running, press Ctrl+C to stop.");
    let _ = server_handle.join();
}

fn run_server(port: u16) {
    let status = Command::new("cargo")
        .args(["run", "-p", "pubgoods-server"])
        .env("PORT", port.to_string())
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status();

    match status {
        Ok(exit_status) if !exit_status.success() => {
            eprintln!("Server exited with error: {}", exit_status);
            std::process::exit(1);
        }
        Ok(_) => {}
        Err(e) => {
            eprintln!("Failed to start server: {}", e);
            std::process::exit(1);
        }
    }
}

fn run_bots(bots: u32, room: Option<String>, port: u16) {
    let mut children = Vec::new();
    for i in 1..=bots {
        let mut args = vec![
            "--name".to_string(),
            format!("Bot{}", i),
            "--url".to_string(),
            ws_url(port),
        ];
        if let Some(room) = &room {
            args.push("--room".into());
            args.push(room.clone());
        }
        // stagger joins so the room listing is settled
        thread::sleep(Duration::from_millis(300));
        children.extend(spawn_demo(&args));
    }
    for mut child in children {
        let _ = child.wait();
    }
}

fn spawn_demo(args: &[String]) -> Option<Child> {
    let spawned = Command::new("cargo")
        .args(["run", "--quiet", "--bin", "demo_cli", "--"])
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn();
    match spawned {
        Ok(child) => Some(child),
        Err(e) => {
            eprintln!("Failed to start demo client: {}", e);
            None
        }
    }
}

fn ws_url(port: u16) -> String {
    format!("ws://127.0.0.1:{}/ws", port)
}
