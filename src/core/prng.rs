// Minimal PRNG (no external crates).
//
// This is NOT cryptographically secure.
// It seeds encoders, intercepts, rates and evaluation points so that a rebuilt
// simulator reproduces the previous run bit for bit.

#[derive(Debug, Clone)]
pub struct Prng {
    state: u64,
}

impl Prng {
    pub fn new(seed: u64) -> Self {
        // Avoid a zero state.
        let seed = if seed == 0 { 0x9E3779B97F4A7C15 } else { seed };
        Self { state: seed }
    }

    /// Independent stream for object `index` under a model-wide `seed`.
    pub fn derive(seed: u64, index: u64) -> Self {
        // splitmix64 finalizer over the pair.
        let mut z = seed ^ index.wrapping_add(1).wrapping_mul(0x9E3779B97F4A7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        Self::new(z ^ (z >> 31))
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    /// Uniform in [0,1).
    #[inline]
    pub fn next_f64_01(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    #[inline]
    pub fn gen_range_f64(&mut self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.next_f64_01()
    }

    #[inline]
    pub fn gen_range_usize(&mut self, low: usize, high: usize) -> usize {
        if high <= low {
            return low;
        }
        let span = (high - low) as u64;
        low + (self.next_u64() % span) as usize
    }

    /// Standard normal sample (Box-Muller).
    pub fn next_gaussian(&mut self) -> f64 {
        let u1 = self.next_f64_01().max(f64::MIN_POSITIVE);
        let u2 = self.next_f64_01();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    /// Uniformly distributed point on the unit sphere in `dims` dimensions.
    pub fn unit_vector(&mut self, dims: usize) -> Vec<f64> {
        if dims == 0 {
            return Vec::new();
        }
        loop {
            let v: Vec<f64> = (0..dims).map(|_| self.next_gaussian()).collect();
            let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
            if norm > 1e-12 {
                return v.into_iter().map(|x| x / norm).collect();
            }
        }
    }

    /// Uniformly distributed point inside the ball of `radius`.
    pub fn ball_point(&mut self, dims: usize, radius: f64) -> Vec<f64> {
        let dir = self.unit_vector(dims);
        let r = radius * self.next_f64_01().powf(1.0 / dims.max(1) as f64);
        dir.into_iter().map(|x| x * r).collect()
    }
}
