pub mod assignment_planner;
