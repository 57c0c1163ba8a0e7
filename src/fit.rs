use argmin::core::observers::{ObserverMode, SlogLogger};
use argmin::core::{
    ArgminError, Executor, IterState, Jacobian, Operator, Problem, Solver, State,
    TerminationReason, TerminationStatus, KV,
};
use ndarray::{s, Array1, Array2};
use ndarray_linalg::Solve;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::circuit::Circuit;
use crate::spectrum::{CycleId, CycleSpectrum};
use crate::{Error, Result};

type LmState = IterState<Array1<f64>, (), Array2<f64>, (), f64>;

/// Settings for a single equivalent circuit fit
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FitConfig {
    /// Iteration budget, a fit which has not converged by then fails
    pub max_iters: u64,
    /// Relative reduction of the cost below which an iteration counts as converged
    pub ftol: f64,
    /// Relative change of every parameter below which an iteration counts as converged
    pub xtol: f64,
    /// Largest cosine between the residual and a Jacobian column at which the current point
    /// counts as stationary
    pub gtol: f64,
    /// Optional ceiling on the root-mean-square residual (Ohm) of an accepted fit
    pub residual_tolerance: Option<f64>,
    /// Log every solver iteration to the terminal
    pub trace: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iters: 500,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
            residual_tolerance: None,
            trace: false,
        }
    }
}

/// Circuit parameters fitted to the spectrum of one cycle
#[derive(Clone, Debug, PartialEq)]
pub struct FittedParameters {
    names: Vec<String>,
    values: Vec<f64>,
    rms_residual: f64,
    iterations: u64,
}

impl FittedParameters {
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Value of the named parameter, such as `R0` or `Ws1_0`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|candidate| candidate == name)
            .map(|ii| self.values[ii])
    }

    /// Root-mean-square of the real and imaginary residuals at the optimum
    #[must_use]
    pub const fn rms_residual(&self) -> f64 {
        self.rms_residual
    }

    #[must_use]
    pub const fn iterations(&self) -> u64 {
        self.iterations
    }
}

/// Fit `circuit` to a preprocessed spectrum, starting from `initial_guess`.
///
/// The initial guess is clamped into the physical bounds of the circuit before the solve.
///
/// # Errors
/// - [`Error::ParameterCountMismatch`] if `initial_guess` does not match the circuit
/// - [`Error::InsufficientData`] if the spectrum has fewer points than the circuit has
///   parameters
/// - [`Error::FitDidNotConverge`] if the iteration budget runs out, the cost is not finite, or
///   the residual is above the configured tolerance
pub fn fit_spectrum(
    spectrum: &CycleSpectrum,
    circuit: &Circuit,
    initial_guess: &[f64],
    config: &FitConfig,
) -> Result<FittedParameters> {
    circuit.check_params(initial_guess)?;
    if spectrum.len() < circuit.num_params() {
        return Err(Error::InsufficientData {
            cycle: spectrum.cycle(),
            required: circuit.num_params(),
            got: spectrum.len(),
        });
    }

    let problem = ImpedanceResidual::new(circuit.clone(), spectrum);
    let target_cost = problem.exact_fit_cost();
    let solver = LevenbergMarquardt::new(circuit, config);
    let initial_parameters = solver.project(Array1::from(initial_guess.to_vec()));

    let mut executor = Executor::new(problem, solver).configure(|state| {
        state
            .param(initial_parameters)
            .max_iters(config.max_iters)
            .target_cost(target_cost)
    });
    if config.trace {
        executor = executor.add_observer(SlogLogger::term(), ObserverMode::Always);
    }
    let res = executor.run()?;

    let state = res.state();
    let iterations = state.get_iter();
    let cost = state.get_best_cost();
    let converged = matches!(
        state.get_termination_status(),
        TerminationStatus::Terminated(
            TerminationReason::SolverConverged | TerminationReason::TargetCostReached
        )
    );

    let not_converged = || Error::FitDidNotConverge {
        cycle: spectrum.cycle(),
        iterations,
        cost,
    };

    let param = state
        .get_best_param()
        .or_else(|| state.get_param())
        .ok_or_else(not_converged)?;

    #[allow(clippy::cast_precision_loss)]
    let rms_residual = (cost / (2 * spectrum.len()) as f64).sqrt();
    let within_tolerance = config
        .residual_tolerance
        .map_or(true, |tolerance| rms_residual <= tolerance);

    if !(converged && cost.is_finite() && within_tolerance) {
        return Err(not_converged());
    }

    Ok(FittedParameters {
        names: circuit.parameter_names().to_vec(),
        values: param.to_vec(),
        rms_residual,
        iterations,
    })
}

/// Residual of a circuit against a measured spectrum.
///
/// The residual vector stacks the real parts of `model - measured` for every frequency, followed
/// by the imaginary parts, so both components carry equal weight in the cost.
#[derive(Clone, Debug)]
pub(crate) struct ImpedanceResidual {
    circuit: Circuit,
    cycle: CycleId,
    frequencies: Vec<f64>,
    measured: Vec<Complex64>,
}

impl ImpedanceResidual {
    pub(crate) fn new(circuit: Circuit, spectrum: &CycleSpectrum) -> Self {
        Self {
            circuit,
            cycle: spectrum.cycle(),
            frequencies: spectrum.frequencies().to_vec(),
            measured: spectrum.impedance().to_vec(),
        }
    }

    /// Cost below which the model reproduces the measurement to numerical precision. Used as
    /// the solver's target cost, as nearly degenerate arcs never meet the relative tolerances.
    fn exact_fit_cost(&self) -> f64 {
        let signal: f64 = self.measured.iter().map(Complex64::norm_sqr).sum();
        EXACT_FIT_RELATIVE_RMS.powi(2) * signal
    }

    fn compute(&self, params: &Array1<f64>) -> Array1<f64> {
        let params = params.to_vec();
        let n = self.frequencies.len();
        let mut residuals = Array1::zeros(2 * n);
        for (ii, (&frequency, measured)) in self.frequencies.iter().zip(&self.measured).enumerate()
        {
            let difference = self.circuit.impedance(&params, frequency) - measured;
            residuals[ii] = difference.re;
            residuals[n + ii] = difference.im;
        }
        residuals
    }
}

impl Operator for ImpedanceResidual {
    type Param = Array1<f64>;
    type Output = Array1<f64>;

    fn apply(&self, p: &Self::Param) -> ::std::result::Result<Self::Output, argmin::core::Error> {
        if p.len() != self.circuit.num_params() {
            return Err(Error::ParameterCountMismatch {
                circuit: self.circuit.description().to_owned(),
                expected: self.circuit.num_params(),
                got: p.len(),
            }
            .into());
        }
        Ok(self.compute(p))
    }
}

impl Jacobian for ImpedanceResidual {
    type Param = Array1<f64>;
    type Jacobian = Array2<f64>;

    /// Central difference approximation, with steps relative to each parameter's magnitude
    fn jacobian(
        &self,
        p: &Self::Param,
    ) -> ::std::result::Result<Self::Jacobian, argmin::core::Error> {
        let mut jacobian = Array2::zeros((2 * self.frequencies.len(), p.len()));
        for jj in 0..p.len() {
            let step = f64::EPSILON.cbrt() * p[jj].abs().max(1e-8);
            let mut plus = p.clone();
            plus[jj] += step;
            let mut minus = p.clone();
            minus[jj] -= step;

            let column = (self.compute(&plus) - self.compute(&minus)) / (2. * step);
            jacobian.slice_mut(s![.., jj]).assign(&column);
        }
        if jacobian.iter().any(|v| !v.is_finite()) {
            log::trace!(
                "non-finite jacobian for cycle {} at {p}, the fit will rely on damping",
                self.cycle
            );
            jacobian.mapv_inplace(|v| if v.is_finite() { v } else { 0. });
        }
        Ok(jacobian)
    }
}

/// Residual rms, relative to the rms of the measurement, treated as an exact fit
const EXACT_FIT_RELATIVE_RMS: f64 = 1e-7;

fn sum_of_squares(residuals: &Array1<f64>) -> f64 {
    residuals.dot(residuals)
}

const LAMBDA_INITIAL: f64 = 1e-3;
const LAMBDA_FACTOR: f64 = 10.;
const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e16;

/// Levenberg-Marquardt with Marquardt diagonal scaling and box constraints.
///
/// Each iteration solves the damped normal equations
/// $$
///     (J^T J + \lambda \operatorname{diag}(J^T J)) \delta = -J^T r
/// $$
/// and projects `x + δ` back into the bounds. Rejected steps raise the damping until the cost
/// decreases. When no damping produces a decrease the current point is stationary, and the
/// solver reports convergence. So does a gradient whose scaled components all fall below
/// `gtol`, measured as the cosine between the residual and each Jacobian column.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LevenbergMarquardt {
    lower: Vec<f64>,
    upper: Vec<f64>,
    ftol: f64,
    xtol: f64,
    gtol: f64,
    lambda: f64,
    converged: bool,
}

impl LevenbergMarquardt {
    #[must_use]
    pub fn new(circuit: &Circuit, config: &FitConfig) -> Self {
        Self {
            lower: circuit.lower_bounds().to_vec(),
            upper: circuit.upper_bounds().to_vec(),
            ftol: config.ftol,
            xtol: config.xtol,
            gtol: config.gtol,
            lambda: LAMBDA_INITIAL,
            converged: false,
        }
    }

    /// Clamp a parameter vector into the box constraints
    fn project(&self, mut param: Array1<f64>) -> Array1<f64> {
        for ((p, &lo), &hi) in param.iter_mut().zip(&self.lower).zip(&self.upper) {
            *p = p.clamp(lo, hi);
        }
        param
    }

    fn is_small_step(&self, from: &Array1<f64>, to: &Array1<f64>) -> bool {
        from.iter()
            .zip(to)
            .all(|(a, b)| (b - a).abs() <= self.xtol * (a.abs() + self.xtol))
    }

    /// Whether the residual is orthogonal to every Jacobian column to within `gtol`
    fn is_stationary(&self, gradient: &Array1<f64>, normal: &Array2<f64>, cost: f64) -> bool {
        if cost <= 0. {
            return true;
        }
        let residual_norm = cost.sqrt();
        gradient
            .iter()
            .zip(normal.diag())
            .filter(|(_, column)| **column > 0.)
            .all(|(g, column)| g.abs() <= self.gtol * column.sqrt() * residual_norm)
    }
}

impl<O> Solver<O, LmState> for LevenbergMarquardt
where
    O: Operator<Param = Array1<f64>, Output = Array1<f64>>
        + Jacobian<Param = Array1<f64>, Jacobian = Array2<f64>>,
{
    const NAME: &'static str = "Levenberg-Marquardt";

    fn init(
        &mut self,
        problem: &mut Problem<O>,
        state: LmState,
    ) -> ::std::result::Result<(LmState, Option<KV>), argmin::core::Error> {
        let param = state
            .get_param()
            .cloned()
            .ok_or_else(|| ArgminError::NotInitialized {
                text: "Levenberg-Marquardt requires an initial parameter vector".to_owned(),
            })?;
        let param = self.project(param);
        let cost = sum_of_squares(&problem.apply(&param)?);
        self.lambda = LAMBDA_INITIAL;
        self.converged = false;
        Ok((state.param(param).cost(cost), None))
    }

    fn next_iter(
        &mut self,
        problem: &mut Problem<O>,
        mut state: LmState,
    ) -> ::std::result::Result<(LmState, Option<KV>), argmin::core::Error> {
        let param = state
            .take_param()
            .ok_or_else(|| ArgminError::NotInitialized {
                text: "Levenberg-Marquardt lost its parameter vector".to_owned(),
            })?;
        let cost = state.get_cost();

        let residuals = problem.apply(&param)?;
        let jacobian = problem.jacobian(&param)?;
        let gradient = jacobian.t().dot(&residuals);
        let normal = jacobian.t().dot(&jacobian);

        if self.is_stationary(&gradient, &normal, cost) {
            self.converged = true;
            return Ok((state.param(param).cost(cost), None));
        }

        let largest = normal.diag().fold(0f64, |acc, d| acc.max(*d));
        let floor = (largest * f64::EPSILON).max(f64::MIN_POSITIVE);
        let scaling = normal.diag().mapv(|d| d.max(floor));
        let rhs = -&gradient;

        loop {
            let mut damped = normal.clone();
            for (ii, d) in scaling.iter().enumerate() {
                damped[[ii, ii]] += self.lambda * d;
            }

            if let Ok(step) = damped.solve_into(rhs.clone()) {
                let candidate = self.project(&param + &step);
                let candidate_cost = sum_of_squares(&problem.apply(&candidate)?);

                if candidate_cost.is_finite() && candidate_cost < cost {
                    self.converged = cost - candidate_cost <= self.ftol * cost
                        || self.is_small_step(&param, &candidate);
                    self.lambda = (self.lambda / LAMBDA_FACTOR).max(LAMBDA_MIN);
                    return Ok((state.param(candidate).cost(candidate_cost), None));
                }
            }

            self.lambda *= LAMBDA_FACTOR;
            if self.lambda > LAMBDA_MAX {
                // No step along any damped direction lowers the cost
                self.converged = true;
                return Ok((state.param(param).cost(cost), None));
            }
        }
    }

    fn terminate(&mut self, _state: &LmState) -> TerminationStatus {
        if self.converged {
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
        } else {
            TerminationStatus::NotTerminated
        }
    }
}
