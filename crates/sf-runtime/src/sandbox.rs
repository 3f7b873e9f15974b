use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::mem;
use std::rc::Rc;

use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Dynamic, Engine, EvalAltResult, ImmutableString, Map, Scope, INT};
use serde::{Deserialize, Serialize};
use sf_core::{StoryForgeError, StoryValue};

use crate::flags::FlagSet;
use crate::rhai_bridge::{dynamic_to_value, value_to_dynamic};

pub const SCRIPT_ERROR: &str = "SCRIPT_ERROR";
const SCRIPT_LOG_TARGET: &str = "storyforge::script";
const HOST_CONSTANT: &str = "runtime";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_operations: 100_000,
            max_call_levels: 32,
            max_expr_depth: 64,
            max_string_size: 64 * 1024,
            max_array_size: 10_000,
            max_map_size: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardRef {
    pub id: String,
    pub title: String,
}

/// Runtime state lent to one script run.
pub struct ScriptContext<'a> {
    pub variables: &'a mut BTreeMap<String, StoryValue>,
    pub flags: &'a mut FlagSet,
    pub visited_cards: &'a BTreeSet<String>,
    pub current_card: Option<CardRef>,
    pub play_time_ms: u64,
}

#[derive(Debug, Default)]
struct HostState {
    variables: BTreeMap<String, StoryValue>,
    flags: FlagSet,
    visited_cards: BTreeSet<String>,
    current_card: Option<CardRef>,
    play_time_ms: u64,
}

#[derive(Clone)]
struct HostRuntime(Rc<RefCell<HostState>>);

fn script_error(message: impl Into<String>) -> Box<EvalAltResult> {
    message.into().into()
}

fn map_script_error(error: Box<EvalAltResult>) -> StoryForgeError {
    StoryForgeError::new(SCRIPT_ERROR, error.to_string())
}

fn register_host_api(engine: &mut Engine) {
    engine.register_type_with_name::<HostRuntime>("Runtime");

    engine.register_fn(
        "getVariable",
        |host: HostRuntime, name: ImmutableString| -> Dynamic {
            host.0
                .borrow()
                .variables
                .get(name.as_str())
                .map(value_to_dynamic)
                .unwrap_or(Dynamic::UNIT)
        },
    );
    engine.register_fn(
        "setVariable",
        |host: HostRuntime,
         name: ImmutableString,
         value: Dynamic|
         -> Result<(), Box<EvalAltResult>> {
            let value = dynamic_to_value(value).map_err(|error| script_error(error.message))?;
            host.0.borrow_mut().variables.insert(name.to_string(), value);
            Ok(())
        },
    );
    engine.register_fn("hasFlag", |host: HostRuntime, name: ImmutableString| -> bool {
        host.0.borrow().flags.has(name.as_str())
    });
    engine.register_fn("setFlag", |host: HostRuntime, name: ImmutableString| {
        host.0.borrow_mut().flags.set(name.as_str());
    });
    engine.register_fn("clearFlag", |host: HostRuntime, name: ImmutableString| {
        host.0.borrow_mut().flags.clear(name.as_str());
    });
    engine.register_fn(
        "hasVisited",
        |host: HostRuntime, card_id: ImmutableString| -> bool {
            host.0.borrow().visited_cards.contains(card_id.as_str())
        },
    );
    engine.register_fn("getCurrentCard", |host: HostRuntime| -> Dynamic {
        match &host.0.borrow().current_card {
            Some(card) => {
                let mut map = Map::new();
                map.insert("id".into(), Dynamic::from(card.id.clone()));
                map.insert("title".into(), Dynamic::from(card.title.clone()));
                Dynamic::from_map(map)
            }
            None => Dynamic::UNIT,
        }
    });
    engine.register_fn("getPlayTime", |host: HostRuntime| -> INT {
        host.0.borrow().play_time_ms as INT
    });
}

/// Rhai engine whose only host capability is the `runtime` constant.
pub struct ScriptSandbox {
    engine: Engine,
    host: HostRuntime,
}

impl ScriptSandbox {
    pub fn new(limits: SandboxLimits) -> Self {
        let mut engine = Engine::new();
        engine.set_strict_variables(true);
        engine.set_max_operations(limits.max_operations);
        engine.set_max_call_levels(limits.max_call_levels);
        engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
        engine.set_max_string_size(limits.max_string_size);
        engine.set_max_array_size(limits.max_array_size);
        engine.set_max_map_size(limits.max_map_size);
        engine.set_module_resolver(DummyModuleResolver::new());
        engine.disable_symbol("eval");
        engine.on_print(|text| tracing::info!(target: SCRIPT_LOG_TARGET, "{}", text));
        engine.on_debug(|text, source, position| {
            tracing::debug!(
                target: SCRIPT_LOG_TARGET,
                source = source.unwrap_or(""),
                line = position.line().unwrap_or(0),
                "{}",
                text
            )
        });
        register_host_api(&mut engine);

        Self {
            engine,
            host: HostRuntime(Rc::new(RefCell::new(HostState::default()))),
        }
    }

    fn scope(&self) -> Scope<'static> {
        let mut scope = Scope::new();
        scope.push_constant(HOST_CONSTANT, self.host.clone());
        scope
    }

    fn lend(&self, context: &mut ScriptContext<'_>) {
        let mut host = self.host.0.borrow_mut();
        host.variables = mem::take(context.variables);
        host.flags = mem::take(context.flags);
        host.visited_cards = context.visited_cards.clone();
        host.current_card = context.current_card.clone();
        host.play_time_ms = context.play_time_ms;
    }

    fn reclaim(&self, context: &mut ScriptContext<'_>) {
        let mut host = self.host.0.borrow_mut();
        *context.variables = mem::take(&mut host.variables);
        *context.flags = mem::take(&mut host.flags);
        host.visited_cards.clear();
        host.current_card = None;
    }

    /// Runs a card script. Mutations made before a failure are kept.
    pub fn run(&self, script: &str, context: &mut ScriptContext<'_>) -> Result<(), StoryForgeError> {
        self.lend(context);
        let mut scope = self.scope();
        let result = self.engine.run_with_scope(&mut scope, script);
        self.reclaim(context);
        result.map_err(map_script_error)
    }

    pub fn eval(
        &self,
        expression: &str,
        context: &mut ScriptContext<'_>,
    ) -> Result<StoryValue, StoryForgeError> {
        self.lend(context);
        let mut scope = self.scope();
        let result = self
            .engine
            .eval_expression_with_scope::<Dynamic>(&mut scope, expression);
        self.reclaim(context);
        dynamic_to_value(result.map_err(map_script_error)?)
    }
}

#[cfg(test)]
mod sandbox_tests {
    use super::*;

    struct Fixture {
        variables: BTreeMap<String, StoryValue>,
        flags: FlagSet,
        visited: BTreeSet<String>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                variables: BTreeMap::new(),
                flags: FlagSet::new(),
                visited: BTreeSet::from(["intro".to_string()]),
            }
        }

        fn context(&mut self) -> ScriptContext<'_> {
            ScriptContext {
                variables: &mut self.variables,
                flags: &mut self.flags,
                visited_cards: &self.visited,
                current_card: Some(CardRef {
                    id: "hall".to_string(),
                    title: "Great Hall".to_string(),
                }),
                play_time_ms: 1500,
            }
        }
    }

    #[test]
    fn scripts_read_and_write_state_through_runtime() {
        let sandbox = ScriptSandbox::new(SandboxLimits::default());
        let mut fixture = Fixture::new();
        fixture.variables.insert("gold".to_string(), StoryValue::Number(10.0));

        sandbox
            .run(
                r#"
let gold = runtime.getVariable("gold");
runtime.setVariable("gold", gold + 5);
runtime.setFlag("entered-hall");
if runtime.hasVisited("intro") { runtime.setVariable("returning", true); }
runtime.setVariable("where", runtime.getCurrentCard().title);
runtime.setVariable("elapsed", runtime.getPlayTime());
"#,
                &mut fixture.context(),
            )
            .expect("script should run");

        assert_eq!(fixture.variables["gold"], StoryValue::Number(15.0));
        assert_eq!(fixture.variables["returning"], StoryValue::Bool(true));
        assert_eq!(fixture.variables["where"], StoryValue::from("Great Hall"));
        assert_eq!(fixture.variables["elapsed"], StoryValue::Number(1500.0));
        assert!(fixture.flags.has("entered-hall"));
    }

    #[test]
    fn expressions_evaluate_to_story_values() {
        let sandbox = ScriptSandbox::new(SandboxLimits::default());
        let mut fixture = Fixture::new();
        fixture
            .variables
            .insert("name".to_string(), StoryValue::from("Ada"));
        let value = sandbox
            .eval(r#"runtime.getVariable("name") + "!""#, &mut fixture.context())
            .expect("expression should evaluate");
        assert_eq!(value, StoryValue::from("Ada!"));
    }

    #[test]
    fn unknown_host_functions_and_globals_are_unreachable() {
        let sandbox = ScriptSandbox::new(SandboxLimits::default());
        let mut fixture = Fixture::new();
        for script in [r#"fetch("https://example.com")"#, "window", r#"eval("1 + 1")"#] {
            let error = sandbox
                .run(script, &mut fixture.context())
                .expect_err("script should be rejected");
            assert_eq!(error.code, SCRIPT_ERROR, "{}", script);
        }
    }

    #[test]
    fn runaway_loops_hit_the_operation_limit() {
        let sandbox = ScriptSandbox::new(SandboxLimits {
            max_operations: 1_000,
            ..SandboxLimits::default()
        });
        let mut fixture = Fixture::new();
        let error = sandbox
            .run("loop { }", &mut fixture.context())
            .expect_err("loop should be stopped");
        assert_eq!(error.code, SCRIPT_ERROR);
    }

    #[test]
    fn failing_script_keeps_earlier_mutations_and_returns_state() {
        let sandbox = ScriptSandbox::new(SandboxLimits::default());
        let mut fixture = Fixture::new();
        fixture.flags.set("kept");
        let result = sandbox.run(
            r#"runtime.setVariable("a", 1); runtime.clearFlag("kept"); missing_fn();"#,
            &mut fixture.context(),
        );
        assert!(result.is_err());
        assert_eq!(fixture.variables["a"], StoryValue::Number(1.0));
        assert!(!fixture.flags.has("kept"));
    }
}
