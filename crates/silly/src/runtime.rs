use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use silly_cluster::Cluster;
use silly_net::{MioDemultiplexer, SocketTable, SocketThread};
use silly_queue::{Command, Message, Queue};
use silly_signal::{SignalForwarder, SignalWatch};
use silly_timer::{TimerThread, Wheel};
use silly_utils::thread_boot;
use tracing::info;

use crate::config::Config;
use crate::daemon::daemonize;
use crate::error::SillyError;
use crate::worker::{Callback, Worker};

const SOCKET_POLL_EVENTS: usize = 256;

/// Owns every thread the framework spawns and the handles needed to unwind
/// them cleanly: the socket thread (event loop over `mio`), the timer
/// thread (wheel tick), the signal forwarder, and the worker (message
/// dispatch to the embedder's [`Callback`]). All four share one
/// [`Queue<Message>`]; only the worker and socket thread share the command
/// queue.
pub struct Runtime {
    table: Arc<SocketTable>,
    commands: Arc<Queue<Command>>,
    messages: Arc<Queue<Message>>,

    socket_handle: Option<JoinHandle<()>>,
    timer_handle: Option<JoinHandle<()>>,
    signal_handle: Option<JoinHandle<()>>,
    worker_handle: Option<JoinHandle<()>>,

    timer_stop: Arc<AtomicBool>,
    signal_watch: SignalWatch,
    worker_stop: Arc<AtomicBool>,
}

impl Runtime {
    /// Spawns all four threads and returns once the worker's bootstrap has
    /// been handed off (bootstrap itself runs on the worker thread, not
    /// here -- `Runtime::start` doesn't block on it completing).
    pub fn start<C: Callback + 'static>(mut config: Config, callback: C) -> Result<Runtime, SillyError> {
        if config.daemon {
            daemonize(std::env::args().next().as_deref().unwrap_or("silly"))?;
        }

        let table = Arc::new(SocketTable::with_capacity(config.socket_queue_size));
        let commands = Arc::new(Queue::new()?);
        let messages = Arc::new(Queue::with_capacity_hint(config.worker_queue_size)?);

        let demux = MioDemultiplexer::new(SOCKET_POLL_EVENTS)?;
        let socket_thread = SocketThread::new(demux, table.clone(), commands.clone(), messages.clone());
        let socket_handle = std::thread::spawn(move || socket_thread.run());

        let wheel = Arc::new(Wheel::new(silly_timing::Duration::from(std::time::Duration::from_millis(
            config.timer_resolution_ms,
        ))));
        let timer_thread = TimerThread::new(wheel, messages.clone());
        let timer_stop = timer_thread.stop_handle();
        let timer_handle = std::thread::spawn(move || timer_thread.run());

        let signal_forwarder = SignalForwarder::new([])?;
        let signal_watch = signal_forwarder.watch_handle();
        let signal_messages = messages.clone();
        let signal_handle = std::thread::spawn(move || signal_forwarder.run(signal_messages));

        let bootstrap = config.bootstrap.take();
        let worker_core = config.worker_core;
        let worker_priority = config.worker_priority;
        let worker = Worker::new(messages.clone(), callback);
        let worker_stop = worker.stop_handle();
        let worker_handle = std::thread::spawn(move || {
            thread_boot(worker_core, worker_priority);
            worker.run(bootstrap);
        });

        info!("silly runtime started");

        Ok(Runtime {
            table,
            commands,
            messages,
            socket_handle: Some(socket_handle),
            timer_handle: Some(timer_handle),
            signal_handle: Some(signal_handle),
            worker_handle: Some(worker_handle),
            timer_stop,
            signal_watch,
            worker_stop,
        })
    }

    pub fn table(&self) -> &Arc<SocketTable> {
        &self.table
    }

    pub fn commands(&self) -> &Arc<Queue<Command>> {
        &self.commands
    }

    pub fn messages(&self) -> &Arc<Queue<Message>> {
        &self.messages
    }

    /// A fresh [`Cluster`] codec sized per the runtime's configured limits,
    /// for an embedder wiring up cluster framing on a connection.
    pub fn new_cluster_codec(&self, hardlimit: u32, softlimit: u32) -> Cluster {
        Cluster::new(hardlimit, softlimit)
    }

    /// Unwinds the worker, timer, signal, and socket threads in that order
    /// and joins them, then exits the process with `code` (0 on clean
    /// shutdown, nonzero otherwise).
    pub fn exit(mut self, code: i32) -> ! {
        self.worker_stop.store(false, Ordering::Release);
        self.messages.push(Message::empty(silly_queue::MessageKind::Close, silly_queue::Sid::INVALID, 0));
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }

        self.timer_stop.store(false, Ordering::Release);
        if let Some(handle) = self.timer_handle.take() {
            let _ = handle.join();
        }

        self.signal_watch.close();
        if let Some(handle) = self.signal_handle.take() {
            let _ = handle.join();
        }

        self.commands.push(Command::Terminate);
        if let Some(handle) = self.socket_handle.take() {
            let _ = handle.join();
        }

        std::process::exit(code)
    }
}
