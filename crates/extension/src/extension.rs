//! A live extension and its lifecycle.
//!
//! ```text
//! toredown --setup--> setup --teardown--> toredown
//! ```
//!
//! Both transitions are idempotent. Across a dependency graph, setup runs
//! bottom-up (dependencies first) and teardown runs top-down (dependents
//! first), see [`Extension::run`].

use crate::behavior::{Action, Behavior, Hook};
use crate::error::{ErrorKind, Result, Stage};
use derive_more::Display;
use exn::ResultExt;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use warden_definition::Value;
use warden_overlay::SearchPath;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum SetupState {
    #[display("toredown")]
    TornDown,
    #[display("setup")]
    Setup,
}

/// Order in which [`Extension::distribute`] visits a dependency graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    /// Each extension before its dependencies.
    #[default]
    TopDown,
    /// Each extension after its dependencies.
    BottomUp,
}

/// What [`Extension::call`] resolved a member name to.
#[derive(Debug, Clone)]
pub enum Member {
    /// An action ran and produced this value.
    Action(Option<Value>),
    Dependency(Arc<Extension>),
}

pub struct Extension {
    name: String,
    paths: SearchPath,
    description: Option<String>,
    dependencies: Vec<Arc<Extension>>,
    setup: Vec<Hook>,
    teardown: Vec<Hook>,
    actions: BTreeMap<String, Action>,
    active: AtomicBool,
}
impl Extension {
    pub fn new(name: impl Into<String>, behavior: Behavior) -> Self {
        Self {
            name: name.into(),
            paths: SearchPath::default(),
            description: None,
            dependencies: Vec::new(),
            setup: behavior.setup,
            teardown: behavior.teardown,
            actions: behavior.actions.into_iter().collect(),
            active: AtomicBool::new(false),
        }
    }

    /// Append a contributing directory. Search order is the order added.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path);
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    /// Append a dependency. Dependencies are distributed to in the order added.
    pub fn with_dependency(mut self, dependency: Arc<Extension>) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Contributing directories, in discovery order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter()
    }

    pub fn dependencies(&self) -> &[Arc<Extension>] {
        &self.dependencies
    }

    pub fn dependency(&self, name: &str) -> Option<&Arc<Extension>> {
        self.dependencies.iter().find(|d| d.name == name)
    }

    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    pub fn state(&self) -> SetupState {
        if self.active.load(Ordering::SeqCst) { SetupState::Setup } else { SetupState::TornDown }
    }

    /// First contributing directory containing `relative`.
    pub async fn find_path(&self, relative: impl AsRef<Path>) -> Option<PathBuf> {
        self.paths.find(relative).await
    }

    /// Run the setup hooks if currently torn down.
    ///
    /// The extension counts as set up as soon as the transition starts, so a
    /// failed hook still gets a matching teardown.
    pub fn setup(&self) -> Result<()> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for hook in &self.setup {
            hook(self).or_raise(|| ErrorKind::Hook { extension: self.name.clone(), stage: Stage::Setup })?;
        }
        tracing::info!(extension = %self.name, "extension set up");
        Ok(())
    }

    /// Run the teardown hooks if currently set up. Every hook runs; the first
    /// failure is returned.
    pub fn teardown(&self) -> Result<()> {
        if !self.active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let mut first = None;
        for hook in &self.teardown {
            if let Err(err) = hook(self) {
                tracing::warn!(extension = %self.name, error = %*err, "teardown hook failed");
                first.get_or_insert(err.raise(ErrorKind::Hook { extension: self.name.clone(), stage: Stage::Teardown }));
            }
        }
        tracing::info!(extension = %self.name, "extension torn down");
        first.map_or(Ok(()), Err)
    }

    /// Apply `visitor` to this extension and, recursively, every dependency.
    ///
    /// An extension reachable along several paths is visited once per path.
    pub fn distribute<T, F>(&self, order: Order, mut visitor: F) -> Vec<T>
    where
        F: FnMut(&Extension) -> T,
    {
        let mut results = Vec::new();
        self.distribute_into(order, &mut visitor, &mut results);
        results
    }

    fn distribute_into<T>(&self, order: Order, visitor: &mut dyn FnMut(&Extension) -> T, results: &mut Vec<T>) {
        if order == Order::TopDown {
            results.push(visitor(self));
        }
        for dependency in &self.dependencies {
            dependency.distribute_into(order, visitor, results);
        }
        if order == Order::BottomUp {
            results.push(visitor(self));
        }
    }

    /// [`distribute`](Self::distribute) that stops at the first error.
    pub fn try_distribute<F>(&self, order: Order, mut visitor: F) -> Result<()>
    where
        F: FnMut(&Extension) -> Result<()>,
    {
        self.try_distribute_into(order, &mut visitor)
    }

    fn try_distribute_into(&self, order: Order, visitor: &mut dyn FnMut(&Extension) -> Result<()>) -> Result<()> {
        if order == Order::TopDown {
            visitor(self)?;
        }
        for dependency in &self.dependencies {
            dependency.try_distribute_into(order, visitor)?;
        }
        if order == Order::BottomUp {
            visitor(self)?;
        }
        Ok(())
    }

    /// Set up the whole dependency graph, dependencies first.
    pub fn setup_all(&self) -> Result<()> {
        self.try_distribute(Order::BottomUp, Extension::setup)
    }

    /// Tear down the whole dependency graph, dependents first. Carries on
    /// past failures and returns the first.
    pub fn teardown_all(&self) -> Result<()> {
        self.distribute(Order::TopDown, Extension::teardown).into_iter().find(|r| r.is_err()).unwrap_or(Ok(()))
    }

    /// Set up the graph, run `block`, then tear the graph down.
    ///
    /// Teardown happens even when setup or `block` fails. The first error
    /// wins; a teardown failure after an earlier error is only logged.
    pub fn run<T, F>(&self, block: F) -> Result<T>
    where
        F: FnOnce(&Extension) -> Result<T>,
    {
        let result = self.setup_all().and_then(|()| block(self));
        let teardown = self.teardown_all();
        match (result, teardown) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(teardown)) => {
                tracing::warn!(extension = %self.name, error = %*teardown, "teardown failed after earlier error");
                Err(err)
            },
        }
    }

    /// Resolve `member` as an action (which is run with `args`), then as a
    /// dependency name.
    pub fn call(&self, member: &str, args: &[Value]) -> Result<Member> {
        if let Some(action) = self.actions.get(member) {
            let value = action(self, args)
                .or_raise(|| ErrorKind::Action { extension: self.name.clone(), action: member.to_string() })?;
            return Ok(Member::Action(value));
        }
        if let Some(dependency) = self.dependency(member) {
            return Ok(Member::Dependency(Arc::clone(dependency)));
        }
        exn::bail!(ErrorKind::UnknownMember { extension: self.name.clone(), member: member.to_string() })
    }
}
impl fmt::Debug for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extension")
            .field("name", &self.name)
            .field("paths", &self.paths)
            .field("dependencies", &self.dependencies.iter().map(|d| &d.name).collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    pub(crate) type Journal = Arc<Mutex<Vec<String>>>;

    /// Behaviour that records every lifecycle transition in `journal`.
    pub(crate) fn recording(name: &'static str, journal: &Journal) -> Behavior {
        let mut behavior = Behavior::default();
        let setup = Arc::clone(journal);
        let teardown = Arc::clone(journal);
        behavior
            .on_setup(move |_| {
                setup.lock().unwrap().push(format!("{name}.setup"));
                Ok(())
            })
            .on_teardown(move |_| {
                teardown.lock().unwrap().push(format!("{name}.teardown"));
                Ok(())
            });
        behavior
    }

    fn graph(journal: &Journal) -> Extension {
        let common = Arc::new(Extension::new("common", recording("common", journal)));
        let mut behavior = recording("shellcode", journal);
        behavior.action("build", |ext, args| {
            let deps: Vec<Value> = ext.dependencies().iter().map(|d| Value::from(d.name())).collect();
            Ok(Some(Value::from(vec![Value::from(args.len() as i64), Value::List(deps)])))
        });
        Extension::new("shellcode", behavior).with_dependency(common)
    }

    #[test]
    fn test_run_orders_setup_and_teardown() {
        let journal = Journal::default();
        let shellcode = graph(&journal);
        let built = shellcode.run(|ext| ext.call("build", &[])).unwrap();
        assert!(matches!(built, Member::Action(Some(_))));
        assert_eq!(
            *journal.lock().unwrap(),
            ["common.setup", "shellcode.setup", "shellcode.teardown", "common.teardown"]
        );
        assert_eq!(shellcode.state(), SetupState::TornDown);
        assert_eq!(shellcode.dependencies()[0].state(), SetupState::TornDown);
    }

    #[test]
    fn test_setup_and_teardown_are_idempotent() {
        let journal = Journal::default();
        let ext = Extension::new("common", recording("common", &journal));
        ext.setup().unwrap();
        ext.setup().unwrap();
        assert_eq!(ext.state(), SetupState::Setup);
        ext.teardown().unwrap();
        ext.teardown().unwrap();
        assert_eq!(*journal.lock().unwrap(), ["common.setup", "common.teardown"]);
    }

    #[test]
    fn test_teardown_runs_when_block_fails() {
        let journal = Journal::default();
        let shellcode = graph(&journal);
        let err = shellcode
            .run(|_| -> Result<()> { exn::bail!(ErrorKind::Behavior("assembler exploded".into())) })
            .unwrap_err();
        assert_eq!(*err, ErrorKind::Behavior("assembler exploded".into()));
        assert_eq!(journal.lock().unwrap().last().map(String::as_str), Some("common.teardown"));
        assert_eq!(shellcode.state(), SetupState::TornDown);
    }

    #[test]
    fn test_teardown_runs_when_setup_fails() {
        let journal = Journal::default();
        let common = Arc::new(Extension::new("common", recording("common", &journal)));
        let mut behavior = recording("shellcode", &journal);
        behavior.on_setup(|_| exn::bail!(ErrorKind::Behavior("no assembler".into())));
        let shellcode = Extension::new("shellcode", behavior).with_dependency(common);

        let ran = std::cell::Cell::new(false);
        let err = shellcode
            .run(|_| {
                ran.set(true);
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::Hook { stage: Stage::Setup, .. }));
        assert!(!ran.get());
        assert_eq!(
            *journal.lock().unwrap(),
            ["common.setup", "shellcode.setup", "shellcode.teardown", "common.teardown"]
        );
    }

    #[test]
    fn test_distribute_orders() {
        let journal = Journal::default();
        let shellcode = graph(&journal);
        let names = |order| shellcode.distribute(order, |e| e.name().to_string());
        assert_eq!(names(Order::TopDown), ["shellcode", "common"]);
        assert_eq!(names(Order::BottomUp), ["common", "shellcode"]);
        assert_eq!(Order::default(), Order::TopDown);
    }

    #[test]
    fn test_call_dispatch() {
        let journal = Journal::default();
        let shellcode = graph(&journal);
        let Member::Action(Some(Value::List(built))) = shellcode.call("build", &[Value::from("x86")]).unwrap() else {
            panic!("build must return a list");
        };
        assert_eq!(built[0], Value::Integer(1));
        let Member::Dependency(common) = shellcode.call("common", &[]).unwrap() else {
            panic!("common must resolve to a dependency");
        };
        assert_eq!(common.name(), "common");
        let err = shellcode.call("frobnicate", &[]).unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnknownMember { member, .. } if member == "frobnicate"));
    }

    #[tokio::test]
    async fn test_find_path_in_discovery_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("template.bin"), "").unwrap();
        let ext = Extension::new("common", Behavior::default()).with_path(first.path()).with_path(second.path());
        assert_eq!(ext.find_path("template.bin").await, Some(second.path().join("template.bin")));
        assert_eq!(ext.paths().count(), 2);
        assert_eq!(ext.find_path("absent.bin").await, None);
    }
}
