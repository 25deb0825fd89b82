//! Auxiliary-space Maxwell solver.
//!
//! The edge-element system is corrected in auxiliary nodal spaces reached
//! through the discrete gradient G and the Nedelec interpolation Pi. Each
//! auxiliary operator gets its own AMG hierarchy; a cycle string decides
//! the order (multiplicative) or grouping (additive) of the corrections.
//!
//! Cycle string digits: 0 fine-grid smoothing, 1 gradient space, 2 vector
//! nodal space, 3/4/5 the x/y/z components of the vector nodal space.

use std::collections::BTreeSet;
use std::sync::Arc;

use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use tracing::info;

use super::amg::{stationary_iteration, AmgHierarchy, AmgOptions, IterationStats};
use super::relax::{Relaxation, Smoother, Sweep};
use super::sparse;
use crate::backend::params::{AmsParams, SubspaceAmgOptions};
use crate::backend::traits::{BackendError, BackendResult, SharedMatrix, SharedVector};

/// Beta Poisson operator for the gradient space.
#[derive(Debug, Clone, Default)]
pub enum BetaPoisson {
    /// Not supplied: formed as G^T A G.
    #[default]
    Galerkin,
    Given(SharedMatrix),
    /// Beta is zero: the gradient correction is skipped.
    Zero,
}

/// Geometric description of the edges.
#[derive(Debug, Clone)]
pub enum EdgeGeometry {
    EdgeConstants(SharedVector, SharedVector, Option<SharedVector>),
    Coordinates(SharedVector, SharedVector, Option<SharedVector>),
}

/// Inputs collected through the `ams_set_*` calls.
#[derive(Debug, Clone, Default)]
pub struct AmsInputs {
    pub gradient: Option<SharedMatrix>,
    pub edge_constants: Option<EdgeGeometry>,
    pub coordinates: Option<EdgeGeometry>,
    pub alpha_poisson: Option<SharedMatrix>,
    pub beta_poisson: BetaPoisson,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SubspaceKind {
    Gradient,
    Nodal,
    NodalComponent(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleNode {
    Smooth,
    Space(SubspaceKind),
    Multiplicative(Vec<CycleNode>),
    Additive(Vec<CycleNode>),
}

impl CycleNode {
    fn collect_spaces(&self, out: &mut BTreeSet<SubspaceKind>) {
        match self {
            CycleNode::Smooth => {}
            CycleNode::Space(kind) => {
                out.insert(*kind);
            }
            CycleNode::Multiplicative(nodes) | CycleNode::Additive(nodes) => {
                nodes.iter().for_each(|n| n.collect_spaces(out));
            }
        }
    }
}

pub fn cycle_string(cycle_type: i32) -> BackendResult<&'static str> {
    Ok(match cycle_type {
        1 => "01210",
        2 => "(0+1+2)",
        3 => "02120",
        4 => "(010+2)",
        5 => "0102010",
        6 => "(1+020)",
        7 => "0201020",
        8 => "0(1+2)0",
        11 => "013454310",
        12 => "(0+1+3+4+5)",
        13 => "034515430",
        14 => "01(3+4+5)10",
        other => {
            return Err(BackendError::unsupported(format!("AMS cycle type {other} is not defined")));
        }
    })
}

pub fn parse_cycle(text: &str) -> BackendResult<CycleNode> {
    let chars: Vec<char> = text.chars().collect();
    let mut pos = 0;
    let nodes = parse_sequence(&chars, &mut pos)?;
    if pos != chars.len() {
        return Err(BackendError::invalid_argument(format!(
            "unexpected '{}' at position {pos} in cycle \"{text}\"",
            chars[pos]
        )));
    }
    Ok(CycleNode::Multiplicative(nodes))
}

fn parse_sequence(chars: &[char], pos: &mut usize) -> BackendResult<Vec<CycleNode>> {
    let mut nodes = Vec::new();
    while let Some(&c) = chars.get(*pos) {
        match c {
            ')' | '+' => break,
            '(' => {
                *pos += 1;
                nodes.push(parse_group(chars, pos)?);
            }
            '0' => {
                *pos += 1;
                nodes.push(CycleNode::Smooth);
            }
            '1' => {
                *pos += 1;
                nodes.push(CycleNode::Space(SubspaceKind::Gradient));
            }
            '2' => {
                *pos += 1;
                nodes.push(CycleNode::Space(SubspaceKind::Nodal));
            }
            '3'..='5' => {
                *pos += 1;
                let d = c as usize - '3' as usize;
                nodes.push(CycleNode::Space(SubspaceKind::NodalComponent(d)));
            }
            other => {
                return Err(BackendError::invalid_argument(format!(
                    "unexpected '{other}' in cycle string"
                )));
            }
        }
    }
    Ok(nodes)
}

fn parse_group(chars: &[char], pos: &mut usize) -> BackendResult<CycleNode> {
    let mut branches = Vec::new();
    loop {
        let seq = parse_sequence(chars, pos)?;
        if !seq.is_empty() {
            branches.push(CycleNode::Multiplicative(seq));
        }
        match chars.get(*pos) {
            Some('+') => *pos += 1,
            Some(')') => {
                *pos += 1;
                return Ok(CycleNode::Additive(branches));
            }
            _ => return Err(BackendError::invalid_argument("unbalanced '(' in cycle string")),
        }
    }
}

/// Auxiliary space: transfer P plus an AMG hierarchy for P^T A P (or the
/// user-supplied Poisson operator standing in for it).
struct Subspace {
    p: CsrMatrix<f64>,
    pt: CsrMatrix<f64>,
    amg: AmgHierarchy,
}

impl Subspace {
    fn build(
        a: &CsrMatrix<f64>,
        p: CsrMatrix<f64>,
        operator: Option<CsrMatrix<f64>>,
        options: &SubspaceAmgOptions,
    ) -> BackendResult<Self> {
        let operator = operator.unwrap_or_else(|| sparse::galerkin(a, &p));
        let amg = AmgHierarchy::build(Arc::new(operator), &AmgOptions::from_params(&options.to_amg_params())?)?;
        Ok(Self {
            pt: p.transpose(),
            p,
            amg,
        })
    }

    fn correct(&self, a: &CsrMatrix<f64>, b: &DVector<f64>, x: &mut DVector<f64>) {
        let r = sparse::residual(a, b, x);
        let rc = sparse::spmv(&self.pt, &r);
        let ec = self.amg.precondition(&rc);
        *x += sparse::spmv(&self.p, &ec);
    }
}

pub struct AmsSolver {
    a: SharedMatrix,
    smoother: Smoother,
    cycle: CycleNode,
    gradient: Option<Subspace>,
    nodal: Option<Subspace>,
    components: Vec<Option<Subspace>>,
}

impl AmsSolver {
    pub fn setup(a: SharedMatrix, inputs: &AmsInputs, params: &AmsParams) -> BackendResult<Self> {
        let dim = params.dimension;
        if !(2..=3).contains(&dim) {
            return Err(BackendError::invalid_argument(format!(
                "AMS dimension must be 2 or 3, got {dim}"
            )));
        }
        let g = inputs
            .gradient
            .as_ref()
            .ok_or_else(|| BackendError::invalid_argument("AMS needs a discrete gradient"))?;
        if g.nrows() != a.nrows() || a.nrows() != a.ncols() {
            return Err(BackendError::invalid_argument(format!(
                "discrete gradient has {} rows but the system has {}x{}",
                g.nrows(),
                a.nrows(),
                a.ncols()
            )));
        }
        let nodes = g.ncols();
        let beta = match &inputs.beta_poisson {
            BetaPoisson::Given(m) => Some(m),
            _ => None,
        };
        for (name, m) in [("alpha", inputs.alpha_poisson.as_ref()), ("beta", beta)] {
            if let Some(m) = m {
                if m.nrows() != nodes || m.ncols() != nodes {
                    return Err(BackendError::invalid_argument(format!(
                        "{name} Poisson matrix is {}x{}, expected {nodes}x{nodes}",
                        m.nrows(),
                        m.ncols()
                    )));
                }
            }
        }

        let cycle = parse_cycle(cycle_string(params.cycle_type)?)?;
        let mut wanted = BTreeSet::new();
        cycle.collect_spaces(&mut wanted);

        let smoothing = &params.smoothing;
        let smoother = Smoother::new(
            &a,
            Relaxation::from_code(smoothing.relax_type)?,
            smoothing.relax_times.max(1),
            smoothing.relax_weight,
            smoothing.omega,
        );

        let needs_nodal = wanted
            .iter()
            .any(|k| matches!(k, SubspaceKind::Nodal | SubspaceKind::NodalComponent(_)));
        let edge_vectors = if needs_nodal {
            edge_tangents(g, inputs, dim)?
        } else {
            Vec::new()
        };

        let gradient = match (&inputs.beta_poisson, wanted.contains(&SubspaceKind::Gradient)) {
            (BetaPoisson::Zero, _) | (_, false) => None,
            (BetaPoisson::Given(beta), true) => Some(Subspace::build(
                &a,
                (**g).clone(),
                Some((**beta).clone()),
                &params.beta_amg,
            )?),
            (BetaPoisson::Galerkin, true) => {
                Some(Subspace::build(&a, (**g).clone(), None, &params.beta_amg)?)
            }
        };

        let nodal = if wanted.contains(&SubspaceKind::Nodal) {
            let pi = nedelec_interpolation(g, &edge_vectors);
            let operator = inputs
                .alpha_poisson
                .as_ref()
                .map(|alpha| sparse::kron_identity(alpha, dim));
            Some(Subspace::build(&a, pi, operator, &params.alpha_amg)?)
        } else {
            None
        };

        let mut components = Vec::with_capacity(dim);
        for d in 0..dim {
            if wanted.contains(&SubspaceKind::NodalComponent(d)) {
                let pi_d = nedelec_interpolation(g, &edge_vectors[d..=d]);
                let operator = inputs.alpha_poisson.as_ref().map(|alpha| (**alpha).clone());
                components.push(Some(Subspace::build(&a, pi_d, operator, &params.alpha_amg)?));
            } else {
                components.push(None);
            }
        }

        if params.print_level > 0 {
            info!(
                edges = a.nrows(),
                nodes,
                cycle_type = params.cycle_type,
                gradient_space = gradient.is_some(),
                "AMS setup complete"
            );
        }

        Ok(Self {
            a,
            smoother,
            cycle,
            gradient,
            nodal,
            components,
        })
    }

    pub fn iterate(
        &self,
        a: &CsrMatrix<f64>,
        b: &DVector<f64>,
        x: &mut DVector<f64>,
        max_iter: usize,
        tol: f64,
    ) -> IterationStats {
        stationary_iteration("AMS", a, b, x, max_iter, tol, |b, x| self.cycle_once(b, x))
    }

    /// z = B r for one cycle from a zero initial guess.
    pub fn precondition(&self, r: &DVector<f64>) -> DVector<f64> {
        let mut z = DVector::zeros(r.len());
        self.cycle_once(r, &mut z);
        z
    }

    pub fn system(&self) -> &SharedMatrix {
        &self.a
    }

    fn cycle_once(&self, b: &DVector<f64>, x: &mut DVector<f64>) {
        let mut smooth_count = 0;
        self.apply(&self.cycle, b, x, &mut smooth_count);
    }

    fn apply(&self, node: &CycleNode, b: &DVector<f64>, x: &mut DVector<f64>, smooth_count: &mut usize) {
        match node {
            CycleNode::Smooth => {
                // Alternate directions so that the whole cycle stays symmetric.
                let sweep = if *smooth_count % 2 == 0 {
                    Sweep::Forward
                } else {
                    Sweep::Backward
                };
                *smooth_count += 1;
                self.smoother.smooth(&self.a, b, x, sweep);
            }
            CycleNode::Space(kind) => {
                if let Some(space) = self.space(*kind) {
                    space.correct(&self.a, b, x);
                }
            }
            CycleNode::Multiplicative(nodes) => {
                for n in nodes {
                    self.apply(n, b, x, smooth_count);
                }
            }
            CycleNode::Additive(nodes) => {
                let start = x.clone();
                let mut total = DVector::zeros(x.len());
                for n in nodes {
                    let mut branch = start.clone();
                    self.apply(n, b, &mut branch, smooth_count);
                    total += branch - &start;
                }
                *x = start + total;
            }
        }
    }

    fn space(&self, kind: SubspaceKind) -> Option<&Subspace> {
        match kind {
            SubspaceKind::Gradient => self.gradient.as_ref(),
            SubspaceKind::Nodal => self.nodal.as_ref(),
            SubspaceKind::NodalComponent(d) => self.components.get(d).and_then(Option::as_ref),
        }
    }
}

/// Edge tangent components G_d, either given directly or as G * coord_d.
fn edge_tangents(g: &CsrMatrix<f64>, inputs: &AmsInputs, dim: usize) -> BackendResult<Vec<DVector<f64>>> {
    let geometry = inputs
        .edge_constants
        .as_ref()
        .or(inputs.coordinates.as_ref())
        .ok_or_else(|| {
            BackendError::invalid_argument("AMS needs edge constant vectors or vertex coordinates")
        })?;
    let (vectors, expected, from_coordinates) = match geometry {
        EdgeGeometry::EdgeConstants(x, y, z) => ([x, y], z.as_ref(), false),
        EdgeGeometry::Coordinates(x, y, z) => ([x, y], z.as_ref(), true),
    };
    let mut components: Vec<&SharedVector> = vectors.to_vec();
    if dim == 3 {
        let z = expected.ok_or_else(|| {
            BackendError::invalid_argument("a 3-D problem needs the z component")
        })?;
        components.push(z);
    }

    let expected_len = if from_coordinates { g.ncols() } else { g.nrows() };
    components
        .into_iter()
        .map(|v| {
            if v.len() != expected_len {
                return Err(BackendError::invalid_argument(format!(
                    "geometry vector has length {}, expected {expected_len}",
                    v.len()
                )));
            }
            Ok(if from_coordinates {
                sparse::spmv(g, v)
            } else {
                (**v).clone()
            })
        })
        .collect()
}

/// Pi with entries 0.5 * |G_en| * t_d(e), column `n * dim + d`.
fn nedelec_interpolation(g: &CsrMatrix<f64>, tangents: &[DVector<f64>]) -> CsrMatrix<f64> {
    let dim = tangents.len();
    sparse::from_triplets(
        g.nrows(),
        g.ncols() * dim,
        g.triplet_iter().flat_map(|(e, n, &v)| {
            tangents
                .iter()
                .enumerate()
                .map(move |(d, t)| (e, n * dim + d, 0.5 * v.abs() * t[e]))
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_cycle_type_parses() {
        for t in [1, 2, 3, 4, 5, 6, 7, 8, 11, 12, 13, 14] {
            let text = cycle_string(t).expect("defined");
            parse_cycle(text).unwrap_or_else(|e| panic!("cycle {t}: {e}"));
        }
        assert_eq!(cycle_string(9).unwrap_err().code(), 5);
    }

    #[test]
    fn parse_builds_nested_nodes() {
        let node = parse_cycle("0(1+2)0").expect("parse");
        assert_eq!(
            node,
            CycleNode::Multiplicative(vec![
                CycleNode::Smooth,
                CycleNode::Additive(vec![
                    CycleNode::Multiplicative(vec![CycleNode::Space(SubspaceKind::Gradient)]),
                    CycleNode::Multiplicative(vec![CycleNode::Space(SubspaceKind::Nodal)]),
                ]),
                CycleNode::Smooth,
            ])
        );
        assert!(parse_cycle("0(1+2").is_err());
        assert!(parse_cycle("01)").is_err());
    }

    #[test]
    fn collects_only_named_spaces() {
        let mut spaces = BTreeSet::new();
        parse_cycle("01(3+4+5)10").expect("parse").collect_spaces(&mut spaces);
        assert!(spaces.contains(&SubspaceKind::Gradient));
        assert!(!spaces.contains(&SubspaceKind::Nodal));
        assert!(spaces.contains(&SubspaceKind::NodalComponent(2)));
    }

    #[test]
    fn nedelec_interpolation_uses_half_absolute_gradient() {
        // One edge from node 0 to node 1 along x with length 2.
        let g = sparse::from_triplets(1, 2, vec![(0, 0, -1.0), (0, 1, 1.0)]);
        let tx = DVector::from_vec(vec![2.0]);
        let ty = DVector::from_vec(vec![0.0]);
        let pi = nedelec_interpolation(&g, &[tx, ty]);
        assert_eq!((pi.nrows(), pi.ncols()), (1, 4));
        assert_eq!(sparse::entry(&pi, 0, 0), 1.0);
        assert_eq!(sparse::entry(&pi, 0, 2), 1.0);
        assert_eq!(sparse::entry(&pi, 0, 1), 0.0);
    }
}
