use rustc_hash::FxHashMap;

/// A stack of bindings per name. `push`/`pop` must be balanced by the code
/// that walks into and out of a binding construct; the innermost binding
/// shadows the rest.
#[derive(Debug, Clone)]
pub struct Scope<T> {
    table: FxHashMap<String, Vec<T>>,
}

impl<T> Scope<T> {
    pub fn new() -> Self {
        Self {
            table: FxHashMap::default(),
        }
    }

    pub fn push(&mut self, name: &str, value: T) {
        self.table.entry(name.to_string()).or_default().push(value);
    }

    pub fn pop(&mut self, name: &str) {
        match self.table.get_mut(name) {
            Some(stack) if !stack.is_empty() => {
                stack.pop();
                if stack.is_empty() {
                    self.table.remove(name);
                }
            }
            _ => panic!("Scope::pop on name '{}' with no binding", name),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.get(name).is_some_and(|s| !s.is_empty())
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.table.get(name).and_then(|s| s.last())
    }
}

impl<T> Default for Scope<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Fresh-name source. One instance per pass invocation, so equal inputs
/// produce identical names on every run.
#[derive(Debug, Default)]
pub struct NameGen {
    counter: u32,
}

impl NameGen {
    pub fn new() -> Self {
        Self { counter: 0 }
    }

    pub fn fresh(&mut self, prefix: &str) -> String {
        let n = self.counter;
        self.counter += 1;
        format!("{}.{}", prefix, n)
    }
}
