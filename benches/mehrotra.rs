use conifer::linalg::lu::FullPivLu;
use conifer::lp::mpc::{MehrotraCtrl, mehrotra_sparse};
use conifer::lp::{LinearProgram, Solution};
use faer::sparse::{SparseColMat, Triplet};
use faer::{Col, Mat};

fn main() {
    divan::main();
}

/// Upper-bidiagonal equality constraints with a strictly positive optimum.
fn band_lp(n: usize) -> LinearProgram<SparseColMat<usize, f64>> {
    let mut triplets = Vec::with_capacity(2 * n);
    for i in 0..n {
        triplets.push(Triplet::new(i, i, 1.0));
        if i + 1 < n {
            triplets.push(Triplet::new(i, i + 1, 0.5));
        }
    }
    let a = SparseColMat::try_new_from_triplets(n, n, &triplets).unwrap();
    LinearProgram::new(a, Col::ones(n), Col::ones(n)).unwrap()
}

#[divan::bench(args = [16, 64, 256])]
fn mehrotra_band(n: usize) {
    let lp = band_lp(n);
    let mut sol = Solution::zeros(n, n);
    divan::black_box(mehrotra_sparse(&lp, &mut sol, &MehrotraCtrl::default()).unwrap());
}

#[divan::bench(args = [32, 96])]
fn lu_complete_pivot(n: usize) {
    let a = Mat::from_fn(n, n, |i, j| {
        let base = ((i * 31 + j * 17) % 13) as f64 - 6.0;
        if i == j { base + 20.0 } else { base }
    });
    divan::black_box(FullPivLu::new(a.as_ref()).unwrap());
}
