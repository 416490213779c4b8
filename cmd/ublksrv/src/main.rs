//! CLI entry point: wires the control plane, a backend, and the
//! bringup coordinator together, then blocks until interrupted.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{error, info};

use ublk_backends::{FileBackend, RamBackend};
use ublk_control::{BringupCoordinator, DeviceConfig, UblkCtrl};
use ublk_core::backend::Backend;

#[derive(Parser)]
#[command(name = "ublksrv", about = "userspace block-device server on top of ublk")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bring up a device and run it in the foreground until interrupted.
    Run {
        #[command(subcommand)]
        backend: BackendArgs,
        #[arg(long, default_value_t = 1)]
        queues: u16,
        #[arg(long, default_value_t = 128)]
        queue_depth: u16,
    },
    /// Print a live device's negotiated info.
    Status { dev_id: u32 },
    /// Stop and remove a live device.
    Stop { dev_id: u32 },
}

#[derive(Subcommand)]
enum BackendArgs {
    /// An in-memory backend; contents are lost when the process exits.
    Ram {
        #[arg(long)]
        size_bytes: u64,
    },
    /// A file-backed backend.
    File {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        size_bytes: u64,
    },
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

fn install_sigint_handler() {
    unsafe {
        libc::signal(libc::SIGINT, on_sigint as usize);
        libc::signal(libc::SIGTERM, on_sigint as usize);
    }
}

fn run_device(backend_args: BackendArgs, queues: u16, queue_depth: u16) -> Result<(), Box<dyn std::error::Error>> {
    match backend_args {
        BackendArgs::Ram { size_bytes } => {
            let backend = Arc::new(RamBackend::new(size_bytes));
            bring_up_and_wait(backend, size_bytes, queues, queue_depth)
        }
        BackendArgs::File { path, size_bytes } => {
            let backend = Arc::new(FileBackend::open(&path, size_bytes)?);
            bring_up_and_wait(backend, size_bytes, queues, queue_depth)
        }
    }
}

fn bring_up_and_wait<B: Backend + 'static>(
    backend: Arc<B>,
    size_bytes: u64,
    queues: u16,
    queue_depth: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = DeviceConfig::default()
        .nr_hw_queues(queues)
        .queue_depth(queue_depth)
        .dev_bytes(size_bytes);

    let mut ctrl = UblkCtrl::open()?;
    let coordinator = BringupCoordinator::new(config, backend);
    let running = coordinator.bring_up(&mut ctrl)?;
    info!(
        "device {} live at {}",
        running.dev_id,
        BringupCoordinator::<RamBackend>::bdev_path(running.dev_id)
    );

    running.record().persist(std::path::Path::new("/run/ublk-server"))?;

    install_sigint_handler();
    while !SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    info!("shutdown requested, stopping device {}", running.dev_id);
    running.stop(&mut ctrl)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run { backend, queues, queue_depth } => run_device(backend, queues, queue_depth),
        Command::Status { dev_id } => {
            let mut ctrl = UblkCtrl::open()?;
            let info = ctrl.get_dev_info(dev_id)?;
            println!("{info:#?}");
            Ok(())
        }
        Command::Stop { dev_id } => {
            let mut ctrl = UblkCtrl::open()?;
            ctrl.stop_dev(dev_id)?;
            ctrl.del_dev(dev_id)?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        error!("{e}");
    }
    result
}
