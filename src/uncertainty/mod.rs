//! Post-fit uncertainty calculations.

mod covariance;

pub(crate) use covariance::covariance_matrix;
