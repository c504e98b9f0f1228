//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::rc::Rc;

use lmest_rs::{EstimationProblem, Measurement, ParamId, Parameter, Parameters, SimpleProblem};

/// A measurement that is linear in its parameters:
/// `sum(factors[k] * params[k]) = set_point`.
pub struct LinearMeasurement {
    factors: Vec<f64>,
    params: Vec<ParamId>,
    set_point: f64,
    weight: f64,
    ignored: bool,
}

impl LinearMeasurement {
    pub fn new(factors: &[f64], params: &[ParamId], set_point: f64) -> Self {
        assert_eq!(factors.len(), params.len());
        Self {
            factors: factors.to_vec(),
            params: params.to_vec(),
            set_point,
            weight: 1.0,
            ignored: false,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn ignored(mut self) -> Self {
        self.ignored = true;
        self
    }
}

impl Measurement for LinearMeasurement {
    fn weight(&self) -> f64 {
        self.weight
    }

    fn measured_value(&self) -> f64 {
        self.set_point
    }

    fn theoretical_value(&self, params: &Parameters) -> f64 {
        let mut v = 0.0;
        for (factor, &id) in self.factors.iter().zip(&self.params) {
            v += factor * params.estimate(id);
        }
        v
    }

    fn partial(&self, _params: &Parameters, id: ParamId) -> f64 {
        for (factor, &pid) in self.factors.iter().zip(&self.params) {
            if pid == id {
                return *factor;
            }
        }
        0.0
    }

    fn is_ignored(&self) -> bool {
        self.ignored
    }
}

/// Build a [`SimpleProblem`] holding one free parameter per initial
/// estimate, named `p0`, `p1`, ...
pub fn problem_with_parameters(estimates: &[f64]) -> (SimpleProblem, Vec<ParamId>) {
    let mut problem = SimpleProblem::new();
    let ids = estimates
        .iter()
        .enumerate()
        .map(|(i, &v)| problem.add_parameter(Parameter::new(&format!("p{}", i), v)))
        .collect();
    (problem, ids)
}

/// Circle fitting problem: find the center minimizing the spread of the
/// sample point distances around their mean, the mean playing the role of
/// the radius.
pub struct CircleProblem {
    parameters: Parameters,
    measurements: Vec<Box<dyn Measurement>>,
    cx: ParamId,
    cy: ParamId,
    points: Rc<Vec<(f64, f64)>>,
}

struct CirclePoint {
    px: f64,
    py: f64,
    cx: ParamId,
    cy: ParamId,
    points: Rc<Vec<(f64, f64)>>,
}

impl CirclePoint {
    fn center_distance(&self, params: &Parameters, px: f64, py: f64) -> f64 {
        let dx = px - params.estimate(self.cx);
        let dy = py - params.estimate(self.cy);
        (dx * dx + dy * dy).sqrt()
    }

    fn mean_radius(&self, params: &Parameters) -> f64 {
        let mut r = 0.0;
        for &(px, py) in self.points.iter() {
            r += self.center_distance(params, px, py);
        }
        r / self.points.len() as f64
    }
}

impl Measurement for CirclePoint {
    fn weight(&self) -> f64 {
        1.0
    }

    fn measured_value(&self) -> f64 {
        0.0
    }

    fn theoretical_value(&self, params: &Parameters) -> f64 {
        self.center_distance(params, self.px, self.py) - self.mean_radius(params)
    }

    fn partial(&self, params: &Parameters, id: ParamId) -> f64 {
        let n = self.points.len() as f64;
        if id == self.cx {
            let di = self.center_distance(params, self.px, self.py);
            let own = (params.estimate(self.cx) - self.px) / di;
            let mut mean = 0.0;
            for &(px, py) in self.points.iter() {
                let dk = self.center_distance(params, px, py);
                mean += (params.estimate(self.cx) - px) / dk;
            }
            own - mean / n
        } else if id == self.cy {
            let di = self.center_distance(params, self.px, self.py);
            let own = (params.estimate(self.cy) - self.py) / di;
            let mut mean = 0.0;
            for &(px, py) in self.points.iter() {
                let dk = self.center_distance(params, px, py);
                mean += (params.estimate(self.cy) - py) / dk;
            }
            own - mean / n
        } else {
            0.0
        }
    }
}

impl CircleProblem {
    pub fn new(cx0: f64, cy0: f64, points: &[(f64, f64)]) -> Self {
        let mut parameters = Parameters::new();
        let cx = parameters.add(Parameter::new("cx", cx0));
        let cy = parameters.add(Parameter::new("cy", cy0));
        let points = Rc::new(points.to_vec());
        let measurements = points
            .iter()
            .map(|&(px, py)| {
                Box::new(CirclePoint {
                    px,
                    py,
                    cx,
                    cy,
                    points: Rc::clone(&points),
                }) as Box<dyn Measurement>
            })
            .collect();
        Self {
            parameters,
            measurements,
            cx,
            cy,
            points,
        }
    }

    /// Rebuild the same problem with extra sample points, keeping the
    /// current center estimates.
    pub fn with_more_points(&self, extra: &[(f64, f64)]) -> Self {
        let mut points: Vec<(f64, f64)> = self.points.as_ref().clone();
        points.extend_from_slice(extra);
        Self::new(self.x(), self.y(), &points)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn x(&self) -> f64 {
        self.parameters.estimate(self.cx)
    }

    pub fn y(&self) -> f64 {
        self.parameters.estimate(self.cy)
    }

    /// Mean distance from the sample points to the fitted center.
    pub fn radius(&self) -> f64 {
        let mut r = 0.0;
        for &(px, py) in self.points.iter() {
            let dx = px - self.x();
            let dy = py - self.y();
            r += (dx * dx + dy * dy).sqrt();
        }
        r / self.points.len() as f64
    }
}

impl EstimationProblem for CircleProblem {
    fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    fn parameters_mut(&mut self) -> &mut Parameters {
        &mut self.parameters
    }

    fn measurements(&self) -> &[Box<dyn Measurement>] {
        &self.measurements
    }
}
