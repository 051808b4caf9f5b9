pub mod card_states;
pub mod due_set;
pub mod leech;
pub mod reviews;
pub mod scheduler;
pub mod stats;
