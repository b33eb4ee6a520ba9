// Shells - top-level toolkit objects owned by a run loop
//
// Zero shells: the loop runs until shut down. One shell: the loop exits when
// it closes. Several shells: the loop exits once every one of them has closed.

use crate::error::ShellCloseError;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// A top-level object owned by a run loop (a window, a tray icon...).
///
/// Lives on the loop thread only.
pub trait Shell {
    fn name(&self) -> &str;

    /// Close the object. Called on the loop thread.
    fn close(&mut self) -> anyhow::Result<()>;

    fn is_closed(&self) -> bool;
}

/// Creates a shell on the loop thread. Registered in the service registry as
/// `Arc<dyn ShellFactory>`.
pub trait ShellFactory: Send + Sync {
    fn create(&self) -> anyhow::Result<Box<dyn Shell>>;
}

impl<F> ShellFactory for F
where
    F: Fn() -> anyhow::Result<Box<dyn Shell>> + Send + Sync,
{
    fn create(&self) -> anyhow::Result<Box<dyn Shell>> {
        self()
    }
}

/// `Ok(true)` if a shell was closed, `Ok(false)` if none matched.
pub type ShellCloseResult = Result<bool, ShellCloseError>;

/// How a loop decides it has nothing left to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellMode {
    /// Only an explicit shutdown ends the loop.
    Empty,
    /// The loop is bound to one shell.
    Single,
    /// The loop ends after every shell has closed.
    Aggregate,
}

/// Result of closing every shell of a loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Shells closed by this shutdown.
    pub closed: usize,
    /// Shells that failed to close.
    pub failures: Vec<ShellCloseError>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The shells owned by one run loop.
#[derive(Default)]
pub struct ShellSet {
    shells: Vec<Box<dyn Shell>>,
}

impl ShellSet {
    pub fn new(shells: Vec<Box<dyn Shell>>) -> Self {
        Self { shells }
    }

    pub fn len(&self) -> usize {
        self.shells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shells.is_empty()
    }

    pub fn mode(&self) -> ShellMode {
        match self.shells.len() {
            0 => ShellMode::Empty,
            1 => ShellMode::Single,
            _ => ShellMode::Aggregate,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.shells.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn open_count(&self) -> usize {
        self.shells.iter().filter(|s| !s.is_closed()).count()
    }

    /// The loop's own exit condition. Never true for an empty set.
    pub fn all_closed(&self) -> bool {
        !self.shells.is_empty() && self.open_count() == 0
    }

    /// Close one open shell by name.
    pub fn close(&mut self, name: &str) -> ShellCloseResult {
        match self
            .shells
            .iter_mut()
            .find(|s| s.name() == name && !s.is_closed())
        {
            Some(shell) => close_one(shell.as_mut()).map(|_| true),
            None => Ok(false),
        }
    }

    /// Close every open shell. A failing (or panicking) shell is recorded and
    /// the remaining shells are still closed.
    pub fn close_all(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        for shell in self.shells.iter_mut().filter(|s| !s.is_closed()) {
            match close_one(shell.as_mut()) {
                Ok(()) => report.closed += 1,
                Err(e) => {
                    tracing::warn!(shell = %e.shell, error = %e.message, "Failed to close shell");
                    report.failures.push(e);
                }
            }
        }
        report
    }
}

fn close_one(shell: &mut dyn Shell) -> Result<(), ShellCloseError> {
    let name = shell.name().to_string();
    match catch_unwind(AssertUnwindSafe(|| shell.close())) {
        Ok(Ok(())) => {
            tracing::debug!(shell = %name, "Shell closed");
            Ok(())
        }
        Ok(Err(e)) => Err(ShellCloseError {
            shell: name,
            message: format!("{:#}", e),
        }),
        Err(_) => Err(ShellCloseError {
            shell: name,
            message: "panicked while closing".to_string(),
        }),
    }
}

/// A shell with no visual representation; closes when told to.
#[derive(Debug, Clone)]
pub struct HeadlessShell {
    name: String,
    closed: bool,
}

impl HeadlessShell {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            closed: false,
        }
    }
}

impl Shell for HeadlessShell {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> anyhow::Result<()> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stubborn;

    impl Shell for Stubborn {
        fn name(&self) -> &str {
            "stubborn"
        }

        fn close(&mut self) -> anyhow::Result<()> {
            anyhow::bail!("refusing to close")
        }

        fn is_closed(&self) -> bool {
            false
        }
    }

    struct Exploding;

    impl Shell for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }

        fn close(&mut self) -> anyhow::Result<()> {
            panic!("boom")
        }

        fn is_closed(&self) -> bool {
            false
        }
    }

    fn headless(names: &[&str]) -> ShellSet {
        ShellSet::new(
            names
                .iter()
                .map(|n| Box::new(HeadlessShell::new(*n)) as Box<dyn Shell>)
                .collect(),
        )
    }

    #[test]
    fn test_modes() {
        assert_eq!(headless(&[]).mode(), ShellMode::Empty);
        assert_eq!(headless(&["a"]).mode(), ShellMode::Single);
        assert_eq!(headless(&["a", "b", "c"]).mode(), ShellMode::Aggregate);
    }

    #[test]
    fn test_empty_set_never_all_closed() {
        let mut set = headless(&[]);
        assert!(!set.all_closed());
        let report = set.close_all();
        assert_eq!(report.closed, 0);
        assert!(!set.all_closed());
    }

    #[test]
    fn test_aggregate_closes_after_last_shell() {
        let mut set = headless(&["a", "b", "c"]);

        assert!(set.close("b").unwrap());
        assert!(!set.all_closed());
        assert!(set.close("c").unwrap());
        assert!(!set.all_closed());
        assert!(!set.close("c").unwrap());
        assert!(set.close("a").unwrap());
        assert!(set.all_closed());
    }

    #[test]
    fn test_close_all_isolates_failures() {
        let mut set = ShellSet::new(vec![
            Box::new(HeadlessShell::new("first")),
            Box::new(Stubborn),
            Box::new(Exploding),
            Box::new(HeadlessShell::new("last")),
        ]);

        let report = set.close_all();
        assert_eq!(report.closed, 2);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].shell, "stubborn");
        assert!(report.failures[0].message.contains("refusing"));
        assert_eq!(report.failures[1].shell, "exploding");
        assert!(!report.is_clean());
        assert_eq!(set.open_count(), 2);
    }

    #[test]
    fn test_closure_factory() {
        let factory = || -> anyhow::Result<Box<dyn Shell>> {
            Ok(Box::new(HeadlessShell::new("main")))
        };
        let shell = ShellFactory::create(&factory).unwrap();
        assert_eq!(shell.name(), "main");
        assert!(!shell.is_closed());
    }
}
