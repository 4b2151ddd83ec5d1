//! Partitions sorted runs into contiguous groups whose sizes form an
//! approximately geometric sequence.
//!
//! The lazy reduction policy wants the remaining runs to grow
//! geometrically, like a well-shaped tree. Given run sizes (in write
//! buffer units) and a target group count, this solves for the common
//! ratio and assigns runs to groups greedily from the oldest end.

/// One contiguous group of sorted runs
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunGroup {
    /// Index of the first run in the group
    pub start: usize,

    /// Amount of runs in the group
    pub count: usize,

    /// Accumulated size of the group, in write buffer units
    pub ratio: f64,
}

/// Solves `q + q^2 + ... + q^g = S` for the common ratio `q`.
///
/// `S <= g + 1` collapses to `q = 1`, which also keeps the closed form
/// of the geometric sum away from its pole at `q = 1`.
// NOTE: group counts are tiny, casts are lossless in practice
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss
)]
fn solve_common_ratio(runs: &[f64], g: usize) -> f64 {
    let s: f64 = runs.iter().sum();

    if s <= (g as f64) + 1.0 {
        return 1.0;
    }

    let g_i32 = g as i32;

    let mut q = s.powf(1.0 / g as f64);

    // Newton-Raphson on F(q) = (q^(g+1) - q) / (q - 1) - S,
    // with q * F'(q) standing in for the derivative
    for _ in 0..8 {
        let f = (q.powi(g_i32 + 1) - q) / (q - 1.0);

        let mut fp = q;
        let mut q_k = q;
        for k in 2..=g {
            q_k *= q;
            fp += k as f64 * q_k;
        }

        q -= (f - s) / fp;
    }

    q
}

/// Groups run sizes into `group` contiguous groups.
///
/// Trailing runs that would drag the common ratio down are peeled off
/// as singleton groups first; the rest are assigned right to left,
/// closing a group whenever the accumulated size crosses the next power
/// of the ratio. Returns the groups and the common ratio of the full
/// sequence.
///
/// # Panics
///
/// Panics if `group` is 0 or larger than the amount of runs.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub(crate) fn group_runs(runs: &[f64], group: usize) -> (Vec<RunGroup>, f64) {
    assert!(group > 0);
    assert!(group <= runs.len());

    let mut o = vec![RunGroup::default(); group];

    let ret_q = solve_common_ratio(runs, group);

    let mut n = runs.len();
    let mut g = group;
    let mut q = ret_q;

    // Peel trailing singletons while that improves the ratio
    let mut i = group - 1;
    while q > 1.0 && i > 0 {
        let e = g - i;
        let new_q = solve_common_ratio(&runs[..n - e], g - e);

        if new_q < q {
            for (j, slot) in o.iter_mut().enumerate().take(g).skip(i) {
                let start = j + n - g;
                *slot = RunGroup {
                    start,
                    count: 1,
                    ratio: runs[start],
                };
            }
            n -= e;
            g -= e;
            q = new_q;
        }

        i -= 1;
    }

    // Greedy assignment from the right: close group k once the
    // accumulator crosses q^k
    let mut sr_acc = runs[n - 1];
    let mut q_acc = q.powi(g as i32);
    let mut q_i = g - 1;

    o[q_i].ratio = sr_acc;
    o[0].start = 0;

    for i in (0..n - 1).rev() {
        let new_acc = sr_acc + runs[i];

        if (i < q_i || sr_acc > q_acc || (new_acc - q_acc).abs() > (sr_acc - q_acc).abs())
            && q_i > 0
        {
            o[q_i].start = i + 1;
            q_acc += q.powi(q_i as i32);
            q_i -= 1;
            o[q_i].ratio = 0.0;
        }

        sr_acc = new_acc;
        o[q_i].ratio += runs[i];
    }

    for i in 1..g {
        o[i - 1].count = o[i].start - o[i - 1].start;
    }
    o[g - 1].count = n - o[g - 1].start;

    (o, ret_q)
}
