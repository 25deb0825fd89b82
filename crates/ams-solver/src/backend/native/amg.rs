//! Classical (Ruge-Stüben style) algebraic multigrid.
//!
//! Setup builds a hierarchy of Galerkin coarse operators from a strength
//! graph, a C/F splitting and an interpolation operator per level. The
//! coarsest level is solved with a dense pseudo-inverse so that singular
//! subspace operators are handled.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use rayon::prelude::*;
use tracing::{debug, info};

use super::relax::{Relaxation, Smoother, Sweep};
use super::sparse;
use crate::backend::params::AmgParams;
use crate::backend::traits::{BackendError, BackendResult};

/// Levels with at most this many unknowns are solved directly.
const MAX_COARSE_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coarsening {
    RugeStuben,
    Pmis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Classical,
    Direct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PointType {
    Undecided,
    Coarse,
    Fine,
}

/// Validated AMG configuration.
#[derive(Debug, Clone)]
pub struct AmgOptions {
    pub coarsening: Coarsening,
    pub interpolation: Interpolation,
    pub relaxation: Relaxation,
    pub num_sweeps: usize,
    pub max_levels: usize,
    pub strong_threshold: f64,
    pub p_max: usize,
    pub agg_levels: usize,
    pub agg_num_paths: usize,
    pub print_level: u8,
}

impl AmgOptions {
    pub fn from_params(params: &AmgParams) -> BackendResult<Self> {
        let coarsening = match params.coarsen_type {
            0 | 3 | 6 | 10 => Coarsening::RugeStuben,
            8 => Coarsening::Pmis,
            other => {
                return Err(BackendError::unsupported(format!(
                    "coarsening type {other} is not available in the native backend"
                )));
            }
        };
        let interpolation = match params.interp_type {
            0 | 6 => Interpolation::Classical,
            3 => Interpolation::Direct,
            other => {
                return Err(BackendError::unsupported(format!(
                    "interpolation type {other} is not available in the native backend"
                )));
            }
        };
        if !(0.0..1.0).contains(&params.strong_threshold) {
            return Err(BackendError::invalid_argument(format!(
                "strength threshold must lie in [0, 1), got {}",
                params.strong_threshold
            )));
        }
        Ok(Self {
            coarsening,
            interpolation,
            relaxation: Relaxation::from_code(params.relax_type)?,
            num_sweeps: params.num_sweeps.max(1),
            max_levels: params.max_levels.max(1),
            strong_threshold: params.strong_threshold,
            p_max: params.p_max,
            agg_levels: params.agg_levels,
            agg_num_paths: params.agg_num_paths.max(1),
            print_level: params.print_level,
        })
    }
}

struct Level {
    a: Arc<CsrMatrix<f64>>,
    smoother: Smoother,
    /// Interpolation to this level from the next coarser one, with its transpose.
    transfer: Option<(CsrMatrix<f64>, CsrMatrix<f64>)>,
}

/// Outcome of an iterative solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationStats {
    pub iterations: usize,
    pub relative_residual: f64,
    pub converged: bool,
}

/// Multigrid hierarchy ready for V-cycles.
pub struct AmgHierarchy {
    levels: Vec<Level>,
    coarse_inverse: DMatrix<f64>,
}

impl AmgHierarchy {
    pub fn build(a: Arc<CsrMatrix<f64>>, options: &AmgOptions) -> BackendResult<Self> {
        if a.nrows() == 0 || a.nrows() != a.ncols() {
            return Err(BackendError::invalid_argument(format!(
                "AMG needs a non-empty square matrix, got {}x{}",
                a.nrows(),
                a.ncols()
            )));
        }

        let mut levels = Vec::new();
        let mut current = a;
        for depth in 0..options.max_levels.saturating_sub(1) {
            let n = current.nrows();
            if n <= MAX_COARSE_SIZE {
                break;
            }
            let p = if depth < options.agg_levels {
                aggressive_interpolation(&current, options)
            } else {
                let strong = strength_graph(&current, options.strong_threshold);
                let split = split_points(&strong, options.coarsening);
                interpolation(&current, &strong, &split, options)
            };
            let nc = p.ncols();
            if nc == 0 || nc >= n {
                break;
            }
            let coarse = sparse::galerkin(&current, &p);
            let pt = p.transpose();
            let smoother = level_smoother(&current, options);
            levels.push(Level {
                a: current,
                smoother,
                transfer: Some((p, pt)),
            });
            current = Arc::new(coarse);
        }

        let coarse_inverse = sparse::pseudo_inverse(&current)?;
        let smoother = level_smoother(&current, options);
        levels.push(Level {
            a: current,
            smoother,
            transfer: None,
        });

        let hierarchy = Self {
            levels,
            coarse_inverse,
        };
        if options.print_level > 0 {
            info!(
                levels = hierarchy.num_levels(),
                sizes = ?hierarchy.level_sizes(),
                operator_complexity = hierarchy.operator_complexity(),
                "AMG hierarchy built"
            );
        }
        Ok(hierarchy)
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level_sizes(&self) -> Vec<usize> {
        self.levels.iter().map(|l| l.a.nrows()).collect()
    }

    /// Sum of nonzeros over all levels relative to the finest level.
    pub fn operator_complexity(&self) -> f64 {
        let fine = self.levels[0].a.nnz().max(1) as f64;
        self.levels.iter().map(|l| l.a.nnz() as f64).sum::<f64>() / fine
    }

    /// One V-cycle on the finest level, updating `x` in place.
    pub fn v_cycle(&self, b: &DVector<f64>, x: &mut DVector<f64>) {
        self.cycle(0, b, x);
    }

    fn cycle(&self, depth: usize, b: &DVector<f64>, x: &mut DVector<f64>) {
        let level = &self.levels[depth];
        let Some((p, pt)) = &level.transfer else {
            let r = sparse::residual(&level.a, b, x);
            *x += &self.coarse_inverse * r;
            return;
        };

        level.smoother.smooth(&level.a, b, x, Sweep::Forward);
        let r = sparse::residual(&level.a, b, x);
        let rc = sparse::spmv(pt, &r);
        let mut ec = DVector::zeros(rc.len());
        self.cycle(depth + 1, &rc, &mut ec);
        *x += sparse::spmv(p, &ec);
        level.smoother.smooth(&level.a, b, x, Sweep::Backward);
    }

    /// Runs V-cycles until the relative residual drops to `tol` or
    /// `max_iter` cycles have run.
    pub fn iterate(
        &self,
        a: &CsrMatrix<f64>,
        b: &DVector<f64>,
        x: &mut DVector<f64>,
        max_iter: usize,
        tol: f64,
    ) -> IterationStats {
        stationary_iteration("BoomerAMG", a, b, x, max_iter, tol, |b, x| self.v_cycle(b, x))
    }

    /// z = B r for one V-cycle from a zero initial guess.
    pub fn precondition(&self, r: &DVector<f64>) -> DVector<f64> {
        let mut z = DVector::zeros(r.len());
        self.v_cycle(r, &mut z);
        z
    }
}

/// Repeats `cycle` until ||b - A x|| / ||b|| <= tol or `max_iter` cycles
/// have run. A zero tolerance skips the convergence test and runs exactly
/// `max_iter` cycles.
pub fn stationary_iteration(
    solver: &str,
    a: &CsrMatrix<f64>,
    b: &DVector<f64>,
    x: &mut DVector<f64>,
    max_iter: usize,
    tol: f64,
    mut cycle: impl FnMut(&DVector<f64>, &mut DVector<f64>),
) -> IterationStats {
    let b_norm = b.norm();
    let scale = if b_norm > 0.0 { b_norm } else { 1.0 };
    let mut rel = sparse::residual(a, b, x).norm() / scale;
    if tol > 0.0 && rel <= tol {
        return IterationStats {
            iterations: 0,
            relative_residual: rel,
            converged: true,
        };
    }
    let mut iterations = 0;
    while iterations < max_iter {
        cycle(b, x);
        iterations += 1;
        if tol > 0.0 {
            rel = sparse::residual(a, b, x).norm() / scale;
            debug!(solver, iteration = iterations, relative_residual = rel, "cycle");
            if rel <= tol {
                break;
            }
        }
    }
    if tol <= 0.0 {
        rel = sparse::residual(a, b, x).norm() / scale;
    }
    IterationStats {
        iterations,
        relative_residual: rel,
        converged: tol <= 0.0 || rel <= tol,
    }
}

fn level_smoother(a: &CsrMatrix<f64>, options: &AmgOptions) -> Smoother {
    Smoother::new(a, options.relaxation, options.num_sweeps, 1.0, 1.0)
}

/// `strong[i]` lists the points i strongly depends on:
/// |a_ij| >= theta * max_{k != i} |a_ik|.
fn strength_graph(a: &CsrMatrix<f64>, theta: f64) -> Vec<Vec<usize>> {
    (0..a.nrows())
        .into_par_iter()
        .map(|i| {
            let max_off = sparse::row_entries(a, i)
                .filter(|&(j, _)| j != i)
                .fold(0.0f64, |m, (_, v)| m.max(v.abs()));
            if max_off == 0.0 {
                return Vec::new();
            }
            let cutoff = theta * max_off;
            sparse::row_entries(a, i)
                .filter(|&(j, v)| j != i && v != 0.0 && v.abs() >= cutoff)
                .map(|(j, _)| j)
                .collect()
        })
        .collect()
}

fn transpose_graph(strong: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut out = vec![Vec::new(); strong.len()];
    for (i, row) in strong.iter().enumerate() {
        for &j in row {
            out[j].push(i);
        }
    }
    out
}

fn split_points(strong: &[Vec<usize>], coarsening: Coarsening) -> Vec<PointType> {
    let strong_t = transpose_graph(strong);
    match coarsening {
        Coarsening::RugeStuben => ruge_stuben_split(strong, &strong_t),
        Coarsening::Pmis => pmis_split(strong, &strong_t),
    }
}

/// Greedy first pass of Ruge-Stüben: repeatedly pick the undecided point
/// with the most undecided dependents as coarse.
fn ruge_stuben_split(strong: &[Vec<usize>], strong_t: &[Vec<usize>]) -> Vec<PointType> {
    let n = strong.len();
    let mut types = vec![PointType::Undecided; n];
    let mut measure: Vec<usize> = strong_t.iter().map(Vec::len).collect();
    let mut heap = BinaryHeap::with_capacity(n);
    for i in 0..n {
        if strong[i].is_empty() && strong_t[i].is_empty() {
            types[i] = PointType::Fine;
        } else {
            heap.push((measure[i], Reverse(i)));
        }
    }

    while let Some((m, Reverse(i))) = heap.pop() {
        if types[i] != PointType::Undecided || m != measure[i] {
            continue;
        }
        types[i] = PointType::Coarse;
        for &j in &strong_t[i] {
            if types[j] != PointType::Undecided {
                continue;
            }
            types[j] = PointType::Fine;
            for &k in &strong[j] {
                if types[k] == PointType::Undecided {
                    measure[k] += 1;
                    heap.push((measure[k], Reverse(k)));
                }
            }
        }
        for &j in &strong[i] {
            if types[j] == PointType::Undecided && measure[j] > 0 {
                measure[j] -= 1;
                heap.push((measure[j], Reverse(j)));
            }
        }
    }
    types
}

/// Deterministic tie-breaking fraction in [0, 1).
fn tie_break(i: usize) -> f64 {
    let h = (i as u64 ^ 0x5851_F42D_4C95_7F2D).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    (h >> 11) as f64 / (1u64 << 53) as f64
}

/// Parallel modified independent set coarsening.
fn pmis_split(strong: &[Vec<usize>], strong_t: &[Vec<usize>]) -> Vec<PointType> {
    let n = strong.len();
    let weight: Vec<f64> = (0..n).map(|i| strong_t[i].len() as f64 + tie_break(i)).collect();
    let mut types: Vec<PointType> = (0..n)
        .map(|i| {
            if strong_t[i].is_empty() {
                PointType::Fine
            } else {
                PointType::Undecided
            }
        })
        .collect();

    loop {
        let undecided: Vec<usize> = (0..n).filter(|&i| types[i] == PointType::Undecided).collect();
        if undecided.is_empty() {
            break;
        }
        let chosen: Vec<usize> = undecided
            .par_iter()
            .copied()
            .filter(|&i| {
                strong[i]
                    .iter()
                    .chain(&strong_t[i])
                    .all(|&j| types[j] != PointType::Undecided || weight[i] > weight[j])
            })
            .collect();
        if chosen.is_empty() {
            for i in undecided {
                types[i] = PointType::Coarse;
            }
            break;
        }
        for &c in &chosen {
            types[c] = PointType::Coarse;
        }
        for &c in &chosen {
            for &j in &strong_t[c] {
                if types[j] == PointType::Undecided {
                    types[j] = PointType::Fine;
                }
            }
        }
    }
    types
}

fn coarse_numbering(split: &[PointType]) -> (Vec<Option<usize>>, usize) {
    let mut next = 0;
    let map = split
        .iter()
        .map(|t| {
            if *t == PointType::Coarse {
                next += 1;
                Some(next - 1)
            } else {
                None
            }
        })
        .collect();
    (map, next)
}

fn interpolation(
    a: &CsrMatrix<f64>,
    strong: &[Vec<usize>],
    split: &[PointType],
    options: &AmgOptions,
) -> CsrMatrix<f64> {
    let (coarse_index, nc) = coarse_numbering(split);
    let rows: Vec<Vec<(usize, f64)>> = (0..a.nrows())
        .into_par_iter()
        .map(|i| {
            if let Some(ci) = coarse_index[i] {
                return vec![(ci, 1.0)];
            }
            let weights = match options.interpolation {
                Interpolation::Classical => classical_row(a, i, &strong[i], split),
                Interpolation::Direct => direct_row(a, i, &strong[i], split),
            };
            let weights = truncate(weights, options.p_max);
            weights
                .into_iter()
                .filter_map(|(k, w)| coarse_index[k].map(|ck| (ck, w)))
                .collect()
        })
        .collect();

    sparse::from_triplets(
        a.nrows(),
        nc,
        rows.into_iter()
            .enumerate()
            .flat_map(|(i, row)| row.into_iter().map(move |(j, w)| (i, j, w))),
    )
}

/// Weights over fine-grid indices of the strong coarse neighbours of `i`.
fn direct_row(a: &CsrMatrix<f64>, i: usize, strong_i: &[usize], split: &[PointType]) -> Vec<(usize, f64)> {
    let a_ii = sparse::entry(a, i, i);
    let coarse: Vec<(usize, f64)> = strong_i
        .iter()
        .filter(|&&k| split[k] == PointType::Coarse)
        .map(|&k| (k, sparse::entry(a, i, k)))
        .collect();
    let sum_c: f64 = coarse.iter().map(|(_, v)| v).sum();
    if a_ii.abs() < 1e-300 || sum_c.abs() < 1e-300 {
        return Vec::new();
    }
    let sum_all: f64 = sparse::row_entries(a, i)
        .filter(|&(j, _)| j != i)
        .map(|(_, v)| v)
        .sum();
    let alpha = sum_all / sum_c;
    coarse
        .into_iter()
        .map(|(k, a_ik)| (k, -alpha * a_ik / a_ii))
        .collect()
}

/// Classical interpolation: weak connections are lumped into the diagonal,
/// strong fine neighbours are distributed over the common coarse points.
fn classical_row(
    a: &CsrMatrix<f64>,
    i: usize,
    strong_i: &[usize],
    split: &[PointType],
) -> Vec<(usize, f64)> {
    let coarse: Vec<usize> = strong_i
        .iter()
        .copied()
        .filter(|&k| split[k] == PointType::Coarse)
        .collect();
    if coarse.is_empty() {
        return Vec::new();
    }
    let mut numer: Vec<f64> = coarse.iter().map(|&k| sparse::entry(a, i, k)).collect();
    let mut denom = 0.0;
    for (j, a_ij) in sparse::row_entries(a, i) {
        if j == i {
            denom += a_ij;
            continue;
        }
        if strong_i.binary_search(&j).is_err() {
            denom += a_ij;
            continue;
        }
        if split[j] != PointType::Fine {
            continue;
        }
        // strong fine neighbour m = j
        let a_mk: Vec<f64> = coarse.iter().map(|&k| sparse::entry(a, j, k)).collect();
        let s: f64 = a_mk.iter().sum();
        if s.abs() < 1e-300 {
            denom += a_ij;
            continue;
        }
        for (num, v) in numer.iter_mut().zip(&a_mk) {
            *num += a_ij * v / s;
        }
    }
    if denom.abs() < 1e-300 {
        return Vec::new();
    }
    coarse
        .into_iter()
        .zip(numer)
        .map(|(k, num)| (k, -num / denom))
        .collect()
}

/// Keeps the `p_max` largest weights and rescales to preserve the row sum.
fn truncate(mut weights: Vec<(usize, f64)>, p_max: usize) -> Vec<(usize, f64)> {
    if p_max == 0 || weights.len() <= p_max {
        return weights;
    }
    let total: f64 = weights.iter().map(|(_, w)| w).sum();
    weights.sort_by(|x, y| y.1.abs().total_cmp(&x.1.abs()).then(x.0.cmp(&y.0)));
    weights.truncate(p_max);
    let kept: f64 = weights.iter().map(|(_, w)| w).sum();
    if kept.abs() > 1e-300 {
        let scale = total / kept;
        for (_, w) in &mut weights {
            *w *= scale;
        }
    }
    weights
}

/// Two-stage aggressive coarsening: a regular splitting, then a second
/// splitting of its coarse points over long-range connections (coarse
/// points linked by at least `agg_num_paths` strong paths of length two).
fn aggressive_interpolation(a: &CsrMatrix<f64>, options: &AmgOptions) -> CsrMatrix<f64> {
    let strong = strength_graph(a, options.strong_threshold);
    let split = split_points(&strong, options.coarsening);
    let p1 = interpolation(a, &strong, &split, options);
    if p1.ncols() <= MAX_COARSE_SIZE {
        return p1;
    }

    let (coarse_index, nc) = coarse_numbering(&split);
    let strong_t = transpose_graph(&strong);
    let mut long_range: Vec<Vec<usize>> = vec![Vec::new(); nc];
    for (i, ci) in coarse_index.iter().enumerate() {
        let Some(ci) = *ci else { continue };
        let mut paths: HashMap<usize, usize> = HashMap::new();
        for &m in strong[i].iter().chain(&strong_t[i]) {
            if let Some(cm) = coarse_index[m] {
                *paths.entry(cm).or_insert(0) += options.agg_num_paths;
                continue;
            }
            for &k in strong[m].iter().chain(&strong_t[m]) {
                if let Some(ck) = coarse_index[k] {
                    if ck != ci {
                        *paths.entry(ck).or_insert(0) += 1;
                    }
                }
            }
        }
        let mut row: Vec<usize> = paths
            .into_iter()
            .filter(|&(c, count)| c != ci && count >= options.agg_num_paths)
            .map(|(c, _)| c)
            .collect();
        row.sort_unstable();
        long_range[ci] = row;
    }

    let split2 = split_points(&long_range, options.coarsening);
    let a1 = sparse::galerkin(a, &p1);
    let strong1 = strength_graph(&a1, options.strong_threshold);
    let p2 = interpolation(&a1, &strong1, &split2, options);
    if p2.ncols() == 0 || p2.ncols() >= nc {
        return p1;
    }
    let p = &p1 * &p2;
    if options.p_max == 0 {
        return p;
    }
    sparse::from_triplets(
        p.nrows(),
        p.ncols(),
        (0..p.nrows()).flat_map(|i| {
            truncate(sparse::row_entries(&p, i).collect(), options.p_max)
                .into_iter()
                .map(move |(j, w)| (i, j, w))
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn laplacian_2d(n: usize) -> CsrMatrix<f64> {
        let idx = |i: usize, j: usize| i * n + j;
        let mut t = Vec::new();
        for i in 0..n {
            for j in 0..n {
                t.push((idx(i, j), idx(i, j), 4.0));
                if i > 0 {
                    t.push((idx(i, j), idx(i - 1, j), -1.0));
                }
                if i + 1 < n {
                    t.push((idx(i, j), idx(i + 1, j), -1.0));
                }
                if j > 0 {
                    t.push((idx(i, j), idx(i, j - 1), -1.0));
                }
                if j + 1 < n {
                    t.push((idx(i, j), idx(i, j + 1), -1.0));
                }
            }
        }
        sparse::from_triplets(n * n, n * n, t)
    }

    fn options(coarsen_type: i32, interp_type: i32, agg_levels: usize) -> AmgOptions {
        AmgOptions::from_params(&AmgParams {
            coarsen_type,
            interp_type,
            agg_levels,
            ..Default::default()
        })
        .expect("valid options")
    }

    #[test]
    fn unsupported_codes_are_rejected() {
        let params = AmgParams {
            coarsen_type: 21,
            ..Default::default()
        };
        let err = AmgOptions::from_params(&params).unwrap_err();
        assert_eq!(err.code(), 5);
    }

    #[test]
    fn ruge_stuben_split_on_1d_chain_alternates() {
        let strong: Vec<Vec<usize>> = (0..7)
            .map(|i: usize| {
                let mut row = Vec::new();
                if i > 0 {
                    row.push(i - 1);
                }
                if i < 6 {
                    row.push(i + 1);
                }
                row
            })
            .collect();
        let split = split_points(&strong, Coarsening::RugeStuben);
        for i in 0..7 {
            let neighbours_coarse = strong[i].iter().any(|&j| split[j] == PointType::Coarse);
            assert!(split[i] == PointType::Coarse || neighbours_coarse);
        }
        for i in 0..6 {
            assert!(!(split[i] == PointType::Coarse && split[i + 1] == PointType::Coarse));
        }
    }

    #[test]
    fn hierarchy_coarsens_and_converges() {
        let a = Arc::new(laplacian_2d(16));
        for opts in [options(6, 0, 0), options(8, 3, 0), options(10, 6, 1)] {
            let hierarchy = AmgHierarchy::build(a.clone(), &opts).expect("setup");
            assert!(hierarchy.num_levels() > 1);
            let sizes = hierarchy.level_sizes();
            assert!(sizes.windows(2).all(|w| w[1] < w[0]));

            let b = DVector::from_element(a.nrows(), 1.0);
            let mut x = DVector::zeros(a.nrows());
            let stats = hierarchy.iterate(&a, &b, &mut x, 200, 1e-6);
            assert!(stats.converged, "{opts:?}: {stats:?}");
        }
    }

    #[test]
    fn zero_tolerance_runs_exact_cycle_count() {
        let a = Arc::new(laplacian_2d(8));
        let hierarchy = AmgHierarchy::build(a.clone(), &options(6, 0, 0)).expect("setup");
        let b = DVector::from_element(a.nrows(), 1.0);
        let mut x = DVector::zeros(a.nrows());
        let stats = hierarchy.iterate(&a, &b, &mut x, 3, 0.0);
        assert_eq!(stats.iterations, 3);
        assert!(stats.relative_residual < 1.0);
    }

    #[test]
    fn truncation_preserves_row_sum() {
        let w = vec![(0, 0.5), (1, 0.1), (2, 0.3), (3, 0.05)];
        let t = truncate(w, 2);
        assert_eq!(t.len(), 2);
        let sum: f64 = t.iter().map(|(_, v)| v).sum();
        assert!((sum - 0.95).abs() < 1e-12);
    }
}
