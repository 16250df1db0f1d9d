use crate::Extension;
use crate::error::Result;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use warden_definition::Value;

pub type Hook = Arc<dyn Fn(&Extension) -> Result<()> + Send + Sync>;
pub type Action = Arc<dyn Fn(&Extension, &[Value]) -> Result<Option<Value>> + Send + Sync>;
type Initializer = Arc<dyn Fn(&mut Behavior) + Send + Sync>;

/// Native behaviour attached to one extension: lifecycle hooks, named
/// actions, and dependencies beyond those its manifests declare.
#[derive(Clone, Default)]
pub struct Behavior {
    pub(crate) setup: Vec<Hook>,
    pub(crate) teardown: Vec<Hook>,
    pub(crate) actions: Vec<(String, Action)>,
    pub(crate) depends: Vec<String>,
}
impl Behavior {
    /// Append a hook run (in registration order) when the extension is set up.
    pub fn on_setup<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&Extension) -> Result<()> + Send + Sync + 'static,
    {
        self.setup.push(Arc::new(hook));
        self
    }

    /// Append a hook run (in registration order) when the extension is torn down.
    pub fn on_teardown<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&Extension) -> Result<()> + Send + Sync + 'static,
    {
        self.teardown.push(Arc::new(hook));
        self
    }

    /// Declare an action. Declaring the same name again replaces it.
    pub fn action<F>(&mut self, name: impl Into<String>, action: F) -> &mut Self
    where
        F: Fn(&Extension, &[Value]) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        let name = name.into();
        self.actions.retain(|(existing, _)| *existing != name);
        self.actions.push((name, Arc::new(action)));
        self
    }

    pub fn depends(&mut self, name: impl Into<String>) -> &mut Self {
        let name = name.into();
        if !self.depends.contains(&name) {
            self.depends.push(name);
        }
        self
    }
}
impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Behavior")
            .field("setup", &self.setup.len())
            .field("teardown", &self.teardown.len())
            .field("actions", &self.actions.iter().map(|(name, _)| name).collect::<Vec<_>>())
            .field("depends", &self.depends)
            .finish()
    }
}

/// Behaviour initializers, keyed by extension name. Fixed at program start.
///
/// ```
/// use warden_extension::Behaviors;
///
/// let behaviors = Behaviors::default().with("common", |behavior| {
///     behavior.on_setup(|ext| {
///         tracing::info!(extension = ext.name(), "ready");
///         Ok(())
///     });
/// });
/// assert!(behaviors.contains("common"));
/// ```
#[derive(Clone, Default)]
pub struct Behaviors {
    initializers: HashMap<String, Vec<Initializer>>,
}
impl Behaviors {
    /// Add an initializer for `name`. Several may be registered for the same
    /// extension; they run in registration order.
    pub fn register<F>(&mut self, name: impl Into<String>, initializer: F) -> &mut Self
    where
        F: Fn(&mut Behavior) + Send + Sync + 'static,
    {
        self.initializers.entry(name.into()).or_default().push(Arc::new(initializer));
        self
    }

    pub fn with<F>(mut self, name: impl Into<String>, initializer: F) -> Self
    where
        F: Fn(&mut Behavior) + Send + Sync + 'static,
    {
        self.register(name, initializer);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.initializers.contains_key(name)
    }

    /// Names with registered behaviour, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.initializers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run every initializer for `name` against a fresh [`Behavior`].
    pub fn build(&self, name: &str) -> Behavior {
        let mut behavior = Behavior::default();
        for initializer in self.initializers.get(name).into_iter().flatten() {
            initializer(&mut behavior);
        }
        behavior
    }
}
impl fmt::Debug for Behaviors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Behaviors").field("names", &self.names()).finish()
    }
}
