//! Neuron models: gain/bias from tuning parameters, steady-state rates and
//! per-step dynamics.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NeuronType {
    /// Spiking leaky integrate-and-fire.
    #[serde(rename = "LIF")]
    Lif {
        #[serde(default = "default_tau_rc")]
        tau_rc: f64,
        #[serde(default = "default_tau_ref")]
        tau_ref: f64,
    },
    /// Rate approximation of [`NeuronType::Lif`].
    #[serde(rename = "LIFRate")]
    LifRate {
        #[serde(default = "default_tau_rc")]
        tau_rc: f64,
        #[serde(default = "default_tau_ref")]
        tau_ref: f64,
    },
    RectifiedLinear,
    Sigmoid {
        #[serde(default = "default_tau_ref")]
        tau_ref: f64,
    },
}

fn default_tau_rc() -> f64 {
    0.02
}

fn default_tau_ref() -> f64 {
    0.002
}

impl Default for NeuronType {
    fn default() -> Self {
        NeuronType::Lif {
            tau_rc: default_tau_rc(),
            tau_ref: default_tau_ref(),
        }
    }
}

impl fmt::Display for NeuronType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NeuronType::Lif { tau_rc, tau_ref } => {
                write!(f, "LIF(tau_rc={tau_rc}, tau_ref={tau_ref})")
            }
            NeuronType::LifRate { tau_rc, tau_ref } => {
                write!(f, "LIFRate(tau_rc={tau_rc}, tau_ref={tau_ref})")
            }
            NeuronType::RectifiedLinear => f.write_str("RectifiedLinear()"),
            NeuronType::Sigmoid { tau_ref } => write!(f, "Sigmoid(tau_ref={tau_ref})"),
        }
    }
}

/// Mutable per-neuron state carried between steps.
#[derive(Debug, Clone, Default)]
pub struct NeuronState {
    pub voltage: Vec<f64>,
    pub refractory: Vec<f64>,
}

impl NeuronState {
    pub fn new(n: usize) -> Self {
        Self {
            voltage: vec![0.0; n],
            refractory: vec![0.0; n],
        }
    }
}

impl NeuronType {
    pub fn is_spiking(&self) -> bool {
        matches!(self, NeuronType::Lif { .. })
    }

    pub fn probeable(&self) -> &'static [&'static str] {
        if self.is_spiking() {
            &["output", "input", "voltage"]
        } else {
            &["output", "input"]
        }
    }

    /// Gain and bias that realise the requested maximum rates and intercepts.
    pub fn gain_bias(&self, max_rates: &[f64], intercepts: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let mut gain = Vec::with_capacity(max_rates.len());
        let mut bias = Vec::with_capacity(max_rates.len());
        for (&rate, &icpt) in max_rates.iter().zip(intercepts) {
            let (g, b) = match *self {
                NeuronType::Lif { tau_rc, tau_ref } | NeuronType::LifRate { tau_rc, tau_ref } => {
                    let x = 1.0 / (1.0 - ((tau_ref - 1.0 / rate) / tau_rc).exp());
                    let g = (1.0 - x) / (icpt - 1.0);
                    (g, 1.0 - g * icpt)
                }
                NeuronType::RectifiedLinear => {
                    let g = rate / (1.0 - icpt);
                    (g, -icpt * g)
                }
                NeuronType::Sigmoid { tau_ref } => {
                    let lim = 1.0 / tau_ref;
                    let inverse = -(lim / rate - 1.0).ln();
                    let g = inverse / (1.0 - icpt);
                    (g, inverse - g)
                }
            };
            gain.push(g);
            bias.push(b);
        }
        (gain, bias)
    }

    /// Steady-state firing rate for input current `j`.
    pub fn rate(&self, j: f64) -> f64 {
        match *self {
            NeuronType::Lif { tau_rc, tau_ref } | NeuronType::LifRate { tau_rc, tau_ref } => {
                if j > 1.0 {
                    1.0 / (tau_ref + tau_rc * (1.0 / (j - 1.0)).ln_1p())
                } else {
                    0.0
                }
            }
            NeuronType::RectifiedLinear => j.max(0.0),
            NeuronType::Sigmoid { tau_ref } => (1.0 / tau_ref) / (1.0 + (-j).exp()),
        }
    }

    /// Advance one step of `dt` seconds. Spiking neurons emit `1/dt` on a spike.
    pub fn step(&self, dt: f64, j: &[f64], out: &mut [f64], state: &mut NeuronState) {
        match *self {
            NeuronType::Lif { tau_rc, tau_ref } => {
                for i in 0..j.len() {
                    state.refractory[i] -= dt;
                    let delta_t = (dt - state.refractory[i]).clamp(0.0, dt);
                    let mut v = state.voltage[i];
                    v -= (j[i] - v) * (-delta_t / tau_rc).exp_m1();
                    if v > 1.0 {
                        out[i] = 1.0 / dt;
                        // Time since the threshold crossing inside this step.
                        let t_spike = dt + tau_rc * (-(v - 1.0) / (j[i] - 1.0)).ln_1p();
                        state.refractory[i] = tau_ref + t_spike;
                        v = 0.0;
                    } else {
                        out[i] = 0.0;
                    }
                    state.voltage[i] = v.max(0.0);
                }
            }
            _ => {
                for (o, &ji) in out.iter_mut().zip(j) {
                    *o = self.rate(ji);
                }
            }
        }
    }
}
