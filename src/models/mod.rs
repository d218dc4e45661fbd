pub mod assignment;
pub mod course;
pub mod curriculum;
pub mod enrollment;
pub mod quiz;
