//! Teams of participants
//!
//! A [`Team`] is a set of role-scoped participants plus a [`Coordinator`]
//! that decides, one turn at a time, who works next and on which blackboard
//! entries. Members below their depth ceiling run a [`RecursiveSession`]
//! with tools; at the ceiling they answer with a single oracle call.
//!
//! ```text
//! coordinator ──decide──▶ delegate(member, input_keys) ──▶ blackboard
//!      ▲                                                      │
//!      └──────────────── summary + history ◀──────────────────┘
//! ```

mod blackboard;
mod coordinator;
mod engine;
mod environment;
mod participant;
mod role;
mod session;
mod tools;

pub use blackboard::{digest, Blackboard, BlackboardEntry, EntrySummary, DIGEST_CHARS};
pub use coordinator::{
    delegation_schema, validate_decision, Coordinator, CoordinatorView, DecisionHistory,
    DelegationDecision, HistoryEntry, OracleCoordinator, RosterEntry, ScriptedCoordinator,
};
pub use engine::{Team, TeamMember, TeamOutcome, TeamStatus, INITIAL_WRITER};
pub use environment::TeamEnvironment;
pub use participant::{ask_once, parse_answer, render_task, OracleParticipant, Participant};
pub use role::{RecursionContext, RoleScoped};
pub use session::{meta_summary, RecursiveSession, SessionReport, RESEARCH_TOOL};
pub use tools::{team_toolbox, team_tools, LIST_TEAMS, RUN_AD_HOC_TEAM, RUN_TEAM};
