//! Declares the shape of the search space an optimizer samples from. This
//! module only describes what a parameter can look like; it has no opinion
//! on how an optimizer chooses among the described values.

use hopt_base::Value;

/// How one parameter's candidate values are drawn.
#[derive(Clone, Debug)]
pub enum Distribution {
    /// A fixed set of values to choose among (grid search enumerates every
    /// one; the other optimizers sample uniformly).
    Choice(Vec<Value>),
    Uniform { low: f64, high: f64 },
    LogUniform { low: f64, high: f64 },
    Normal { mean: f64, std: f64 },
    Constant(Value),
}

#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub name: String,
    pub distribution: Distribution,
}

pub type SearchSpace = Vec<ParamSpec>;
