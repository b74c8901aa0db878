//! Viewer lifecycle state machine
//!
//! A pure transition table. The session task feeds it events and carries out
//! the returned [`Effect`]; nothing in here touches the engine or the network.

use super::Notice;

/// Which URL of the descriptor a load attempt uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadTarget {
    Primary,
    Fallback,
}

/// Lifecycle of one viewer instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneState {
    Uninitialized,
    Constructing,
    Verifying,
    Loading(LoadTarget),
    Ready,
    Failed,
    Disposing,
    Disposed,
}

impl SceneState {
    /// True once teardown has been requested
    pub fn is_unmounted(self) -> bool {
        matches!(self, SceneState::Disposing | SceneState::Disposed)
    }

    /// True for the states a viewer settles in after loading
    pub fn is_settled(self) -> bool {
        matches!(self, SceneState::Ready | SceneState::Failed)
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Start,
    Constructed,
    ConstructFailed,
    DependenciesVerified,
    DependencyMissing,
    ModelLoaded,
    ModelFailed,
    TeardownRequested,
    GraceElapsed,
}

/// Work the session performs when entering the next state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Create the engine, scene, camera and light
    Construct,
    /// Check every dependency URL concurrently
    Probe,
    /// Import the model at `target`, surfacing `notice` first if present
    Import {
        target: LoadTarget,
        notice: Option<Notice>,
    },
    /// The imported model sits in the scene at the default scale and origin
    Normalize,
    /// Stop loading for good
    Fail(Notice),
    /// Mark unmounted and arm the grace timer
    BeginTeardown,
    /// Stop the render loop and release the engine
    Release,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: SceneState,
    pub effect: Effect,
}

pub const DEPENDENCY_NOTICE: &str = "Cannot access model dependencies. Trying fallback model.";
pub const PRIMARY_FAILED_NOTICE: &str = "Failed to load 3D model. Trying fallback model.";
pub const FALLBACK_FAILED_NOTICE: &str = "Failed to load fallback model.";
pub const CONSTRUCT_FAILED_NOTICE: &str = "Failed to initialize 3D viewer.";

/// Look up the transition for `event` in `state`.
///
/// Returns `None` when the event does not apply, e.g. a load completion that
/// arrives after teardown was requested.
pub fn transition(state: SceneState, event: LifecycleEvent) -> Option<Transition> {
    use LifecycleEvent as E;
    use SceneState as S;

    let (next, effect) = match (state, event) {
        (S::Disposing, E::GraceElapsed) => (S::Disposed, Effect::Release),
        (S::Disposing | S::Disposed, _) => return None,
        (_, E::TeardownRequested) => (S::Disposing, Effect::BeginTeardown),

        (S::Uninitialized, E::Start) => (S::Constructing, Effect::Construct),
        (S::Constructing, E::Constructed) => (S::Verifying, Effect::Probe),
        (S::Constructing, E::ConstructFailed) => {
            (S::Failed, Effect::Fail(Notice::fatal(CONSTRUCT_FAILED_NOTICE)))
        }

        (S::Verifying, E::DependenciesVerified) => (
            S::Loading(LoadTarget::Primary),
            Effect::Import {
                target: LoadTarget::Primary,
                notice: None,
            },
        ),
        (S::Verifying, E::DependencyMissing) => (
            S::Loading(LoadTarget::Fallback),
            Effect::Import {
                target: LoadTarget::Fallback,
                notice: Some(Notice::warning(DEPENDENCY_NOTICE)),
            },
        ),

        (S::Loading(_), E::ModelLoaded) => (S::Ready, Effect::Normalize),
        (S::Loading(LoadTarget::Primary), E::ModelFailed) => (
            S::Loading(LoadTarget::Fallback),
            Effect::Import {
                target: LoadTarget::Fallback,
                notice: Some(Notice::warning(PRIMARY_FAILED_NOTICE)),
            },
        ),
        (S::Loading(LoadTarget::Fallback), E::ModelFailed) => {
            (S::Failed, Effect::Fail(Notice::fatal(FALLBACK_FAILED_NOTICE)))
        }

        _ => return None,
    };

    Some(Transition { next, effect })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::NoticeLevel;

    fn run(events: &[LifecycleEvent]) -> (SceneState, Vec<Effect>) {
        let mut state = SceneState::Uninitialized;
        let mut effects = Vec::new();
        for event in events {
            if let Some(t) = transition(state, *event) {
                state = t.next;
                effects.push(t.effect);
            }
        }
        (state, effects)
    }

    #[test]
    fn test_happy_path_loads_primary() {
        use LifecycleEvent::*;
        let (state, effects) = run(&[Start, Constructed, DependenciesVerified, ModelLoaded]);

        assert_eq!(state, SceneState::Ready);
        assert_eq!(
            effects,
            vec![
                Effect::Construct,
                Effect::Probe,
                Effect::Import {
                    target: LoadTarget::Primary,
                    notice: None
                },
                Effect::Normalize,
            ]
        );
    }

    #[test]
    fn test_missing_dependency_skips_primary() {
        use LifecycleEvent::*;
        let (state, effects) = run(&[Start, Constructed, DependencyMissing, ModelLoaded]);

        assert_eq!(state, SceneState::Ready);
        assert!(!effects.iter().any(|e| matches!(
            e,
            Effect::Import {
                target: LoadTarget::Primary,
                ..
            }
        )));
    }

    #[test]
    fn test_fallback_is_tried_once() {
        use LifecycleEvent::*;
        let (state, effects) = run(&[Start, Constructed, DependenciesVerified, ModelFailed, ModelFailed, ModelFailed]);

        assert_eq!(state, SceneState::Failed);
        let imports = effects
            .iter()
            .filter(|e| matches!(e, Effect::Import { .. }))
            .count();
        assert_eq!(imports, 2);
        match effects.last() {
            Some(Effect::Fail(notice)) => {
                assert_eq!(notice.level, NoticeLevel::Fatal);
                assert_eq!(notice.message, FALLBACK_FAILED_NOTICE);
            }
            other => panic!("unexpected last effect {other:?}"),
        }
    }

    #[test]
    fn test_teardown_from_any_state() {
        let states = [
            SceneState::Uninitialized,
            SceneState::Constructing,
            SceneState::Verifying,
            SceneState::Loading(LoadTarget::Primary),
            SceneState::Loading(LoadTarget::Fallback),
            SceneState::Ready,
            SceneState::Failed,
        ];
        for state in states {
            let t = transition(state, LifecycleEvent::TeardownRequested).unwrap();
            assert_eq!(t.next, SceneState::Disposing);
            assert_eq!(t.effect, Effect::BeginTeardown);
        }
    }

    #[test]
    fn test_completions_after_teardown_are_ignored() {
        use LifecycleEvent::*;
        for event in [Constructed, DependenciesVerified, ModelLoaded, ModelFailed, TeardownRequested] {
            assert!(transition(SceneState::Disposing, event).is_none());
        }
        assert_eq!(
            transition(SceneState::Disposing, GraceElapsed).map(|t| t.next),
            Some(SceneState::Disposed)
        );
        assert!(transition(SceneState::Disposed, GraceElapsed).is_none());
    }

    #[test]
    fn test_out_of_order_events_do_nothing() {
        assert!(transition(SceneState::Uninitialized, LifecycleEvent::ModelLoaded).is_none());
        assert!(transition(SceneState::Ready, LifecycleEvent::ModelFailed).is_none());
        assert!(transition(SceneState::Verifying, LifecycleEvent::GraceElapsed).is_none());
    }
}
