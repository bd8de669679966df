//! Mechanical core of the crowd engine.
//!
//! Geometry and materials at the bottom; contact resolution, locomotion and
//! integration as pure per-step stages; [`Simulation`] on top, owning the
//! agent and obstacle arenas and committing each step atomically.

pub mod agent;
pub mod broadphase;
pub mod contact;
pub mod event;
pub mod frame;
pub mod geometry;
pub mod integrator;
pub mod locomotion;
pub mod material;
pub mod obstacle;
pub mod sim;

pub use agent::{Agent, Body, Drive, Goal, Kinematics, Wrench};
pub use broadphase::BroadPhase;
pub use contact::{Contact, ContactForce, ContactPair, ContactResolver, FrictionModel};
pub use event::{Action, ScheduledAction};
pub use frame::{AgentState, Counterpart, Frame, Interaction};
pub use geometry::{Disk, Segment};
pub use integrator::IntegrationScheme;
pub use material::{ContactLaw, Material};
pub use obstacle::Obstacle;
pub use sim::{Phase, Simulation};
