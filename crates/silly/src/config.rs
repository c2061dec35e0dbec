use silly_utils::ThreadPriority;

/// Cluster codec limits, broken out of [`Config`] the way the framing codec
/// itself separates a hard reject limit from a soft warn-only one.
#[derive(Clone, Copy, Debug)]
pub struct ClusterConfig {
    pub hardlimit: u32,
    pub softlimit: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig { hardlimit: 128 << 20, softlimit: 65535 }
    }
}

/// Recognized startup options. Not a config-file format -- command-line
/// argument parsing is an external collaborator -- just the struct
/// `Runtime::start` consumes.
///
/// `bootstrap` runs once on the worker thread, before its first drain; it is
/// the embedder's chance to perform initial `Command`s (listen, connect)
/// before any message can arrive.
pub struct Config {
    pub bootstrap: Option<Box<dyn FnOnce() + Send>>,
    /// Socket table capacity -- the number of sockets that can be open at
    /// once, not its log2. Rounded up to the next power of two by
    /// [`silly_net::SocketTable::with_capacity`], since the table's sid
    /// encoding requires one internally.
    pub socket_queue_size: u32,
    pub worker_queue_size: usize,
    pub timer_resolution_ms: u64,
    pub cluster: ClusterConfig,
    pub daemon: bool,
    pub worker_core: Option<usize>,
    pub worker_priority: ThreadPriority,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bootstrap: None,
            socket_queue_size: 1 << 16,
            worker_queue_size: 0,
            timer_resolution_ms: 10,
            cluster: ClusterConfig::default(),
            daemon: false,
            worker_core: None,
            worker_priority: ThreadPriority::OSDefault,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_config_has_no_bootstrap() {
        let config = Config::default();
        assert!(config.bootstrap.is_none());
        assert_eq!(config.cluster.hardlimit, 128 << 20);
    }
}
