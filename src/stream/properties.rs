//! Requested tuning parameters and live stream statistics.

use rand::RngExt;

use crate::dvb::tuning::{
    DeliverySystem, FecCode, GuardInterval, Modulation, Pilot, Polarization, RollOff,
    TransmissionMode,
};

/// The channel a client asked for.
///
/// All fields mirror SAT>IP transport parameters in their stored units:
/// frequency in kHz, symbol rate in sym/s, bandwidth in Hz. Every setter
/// raises the changed flag; the frontend clears it after a successful
/// retune.
#[derive(Debug, Clone)]
pub struct ChannelData {
    delivery_system: Option<DeliverySystem>,
    frequency_khz: u32,
    symbol_rate: u32,
    polarization: Option<Polarization>,
    diseqc_source: i32,
    pilot: Pilot,
    rolloff: RollOff,
    fec: FecCode,
    modulation: Option<Modulation>,
    spectral_inversion: i32,
    bandwidth_hz: u32,
    transmission_mode: TransmissionMode,
    guard_interval: GuardInterval,
    plp_id: i32,
    t2_system_id: i32,
    siso_miso: i32,
    changed: bool,
}

impl ChannelData {
    pub fn new() -> Self {
        Self {
            delivery_system: None,
            frequency_khz: 0,
            symbol_rate: 0,
            polarization: None,
            diseqc_source: -1,
            pilot: Pilot::Auto,
            rolloff: RollOff::Auto,
            fec: FecCode::Auto,
            modulation: None,
            spectral_inversion: -1,
            bandwidth_hz: 0,
            transmission_mode: TransmissionMode::Auto,
            guard_interval: GuardInterval::Auto,
            plp_id: -1,
            t2_system_id: -1,
            siso_miso: -1,
            changed: false,
        }
    }

    /// Forget the current channel. Called when a new frequency is
    /// requested; the stale parameter set must not leak into the new
    /// tune request.
    pub fn initialize(&mut self) {
        *self = Self::new();
        self.changed = true;
    }

    pub fn has_changed(&self) -> bool {
        self.changed
    }

    pub fn clear_changed(&mut self) {
        self.changed = false;
    }

    pub fn delivery_system(&self) -> Option<DeliverySystem> {
        self.delivery_system
    }

    pub fn set_delivery_system(&mut self, system: DeliverySystem) {
        self.delivery_system = Some(system);
        self.changed = true;
    }

    pub fn frequency_khz(&self) -> u32 {
        self.frequency_khz
    }

    pub fn set_frequency_khz(&mut self, khz: u32) {
        self.frequency_khz = khz;
        self.changed = true;
    }

    pub fn symbol_rate(&self) -> u32 {
        self.symbol_rate
    }

    pub fn set_symbol_rate(&mut self, sym_per_s: u32) {
        self.symbol_rate = sym_per_s;
        self.changed = true;
    }

    pub fn polarization(&self) -> Option<Polarization> {
        self.polarization
    }

    pub fn set_polarization(&mut self, pol: Polarization) {
        self.polarization = Some(pol);
        self.changed = true;
    }

    pub fn diseqc_source(&self) -> i32 {
        self.diseqc_source
    }

    pub fn set_diseqc_source(&mut self, src: i32) {
        self.diseqc_source = src;
        self.changed = true;
    }

    pub fn pilot(&self) -> Pilot {
        self.pilot
    }

    pub fn set_pilot(&mut self, pilot: Pilot) {
        self.pilot = pilot;
        self.changed = true;
    }

    pub fn rolloff(&self) -> RollOff {
        self.rolloff
    }

    pub fn set_rolloff(&mut self, rolloff: RollOff) {
        self.rolloff = rolloff;
        self.changed = true;
    }

    pub fn fec(&self) -> FecCode {
        self.fec
    }

    pub fn set_fec(&mut self, fec: FecCode) {
        self.fec = fec;
        self.changed = true;
    }

    pub fn modulation(&self) -> Option<Modulation> {
        self.modulation
    }

    pub fn set_modulation(&mut self, modulation: Modulation) {
        self.modulation = Some(modulation);
        self.changed = true;
    }

    pub fn spectral_inversion(&self) -> i32 {
        self.spectral_inversion
    }

    pub fn set_spectral_inversion(&mut self, specinv: i32) {
        self.spectral_inversion = specinv;
        self.changed = true;
    }

    pub fn bandwidth_hz(&self) -> u32 {
        self.bandwidth_hz
    }

    pub fn set_bandwidth_hz(&mut self, hz: u32) {
        self.bandwidth_hz = hz;
        self.changed = true;
    }

    pub fn transmission_mode(&self) -> TransmissionMode {
        self.transmission_mode
    }

    pub fn set_transmission_mode(&mut self, tmode: TransmissionMode) {
        self.transmission_mode = tmode;
        self.changed = true;
    }

    pub fn guard_interval(&self) -> GuardInterval {
        self.guard_interval
    }

    pub fn set_guard_interval(&mut self, gi: GuardInterval) {
        self.guard_interval = gi;
        self.changed = true;
    }

    pub fn plp_id(&self) -> i32 {
        self.plp_id
    }

    pub fn set_plp_id(&mut self, plp: i32) {
        self.plp_id = plp;
        self.changed = true;
    }

    pub fn t2_system_id(&self) -> i32 {
        self.t2_system_id
    }

    pub fn set_t2_system_id(&mut self, t2id: i32) {
        self.t2_system_id = t2id;
        self.changed = true;
    }

    pub fn siso_miso(&self) -> i32 {
        self.siso_miso
    }

    pub fn set_siso_miso(&mut self, sm: i32) {
        self.siso_miso = sm;
        self.changed = true;
    }

    /// Re-serialize the known parameters as a SAT>IP query string.
    ///
    /// Only parameters that were explicitly set appear; the output parses
    /// back to the same channel (key order aside).
    pub fn transport_parameters(&self) -> String {
        let mut out = Vec::new();
        if self.frequency_khz != 0 {
            out.push(format!("freq={}", self.frequency_khz as f64 / 1000.0));
        }
        if self.symbol_rate != 0 {
            out.push(format!("sr={}", self.symbol_rate / 1000));
        }
        if let Some(system) = self.delivery_system {
            out.push(format!("msys={system}"));
        }
        if let Some(pol) = self.polarization {
            out.push(format!("pol={pol}"));
        }
        if self.diseqc_source != -1 {
            out.push(format!("src={}", self.diseqc_source));
        }
        if self.pilot != Pilot::Auto {
            out.push(format!("plts={}", self.pilot));
        }
        if self.rolloff != RollOff::Auto {
            out.push(format!("ro={}", self.rolloff));
        }
        if self.fec != FecCode::Auto {
            out.push(format!("fec={}", self.fec));
        }
        if let Some(modulation) = self.modulation {
            out.push(format!("mtype={modulation}"));
        }
        if self.spectral_inversion != -1 {
            out.push(format!("specinv={}", self.spectral_inversion));
        }
        if self.bandwidth_hz != 0 {
            out.push(format!("bw={}", self.bandwidth_hz as f64 / 1_000_000.0));
        }
        if self.transmission_mode != TransmissionMode::Auto {
            out.push(format!("tmode={}", self.transmission_mode));
        }
        if self.guard_interval != GuardInterval::Auto {
            out.push(format!("gi={}", self.guard_interval));
        }
        if self.plp_id != -1 {
            out.push(format!("plp={}", self.plp_id));
        }
        if self.t2_system_id != -1 {
            out.push(format!("t2id={}", self.t2_system_id));
        }
        if self.siso_miso != -1 {
            out.push(format!("sm={}", self.siso_miso));
        }
        out.join("&")
    }
}

impl Default for ChannelData {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-stream tuning request plus live RTP statistics.
///
/// The statistics feed the RTCP sender reports: SPC/SOC per RFC 3550
/// §6.4.1, the RTP timestamp snapshot, and the SAT>IP describe string
/// reported in the APP packet. The SSRC is chosen randomly per stream
/// (RFC 3550 §8.1) — there is no process-wide RTP state.
#[derive(Debug)]
pub struct StreamProperties {
    stream_id: usize,
    channel: ChannelData,
    ssrc: u32,
    /// Sent RTP packet count.
    spc: u32,
    /// Sent RTP payload octet count.
    soc: u32,
    /// Last RTP timestamp handed to a datagram (90 kHz).
    timestamp: i64,
    /// RTCP period multiplier: the sidecar sleeps 200 ms × this.
    rtcp_signal_update_frequency: u32,
    stream_active: bool,
    signal_strength: u16,
    has_lock: bool,
    signal_quality: u16,
}

impl StreamProperties {
    pub fn new(stream_id: usize) -> Self {
        Self {
            stream_id,
            channel: ChannelData::new(),
            ssrc: rand::rng().random::<u32>(),
            spc: 0,
            soc: 0,
            timestamp: 0,
            rtcp_signal_update_frequency: 1,
            stream_active: false,
            signal_strength: 0,
            has_lock: false,
            signal_quality: 0,
        }
    }

    pub fn stream_id(&self) -> usize {
        self.stream_id
    }

    pub fn channel(&self) -> &ChannelData {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut ChannelData {
        &mut self.channel
    }

    pub fn has_channel_data_changed(&self) -> bool {
        self.channel.has_changed()
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Account one dispatched RTP datagram.
    pub fn add_rtp_data(&mut self, payload_octets: u32, timestamp: i64) {
        self.spc = self.spc.wrapping_add(1);
        self.soc = self.soc.wrapping_add(payload_octets);
        self.timestamp = timestamp;
    }

    pub fn spc(&self) -> u32 {
        self.spc
    }

    pub fn soc(&self) -> u32 {
        self.soc
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn rtcp_signal_update_frequency(&self) -> u32 {
        self.rtcp_signal_update_frequency
    }

    pub fn set_rtcp_signal_update_frequency(&mut self, freq: u32) {
        self.rtcp_signal_update_frequency = freq.max(1);
    }

    pub fn is_stream_active(&self) -> bool {
        self.stream_active
    }

    pub fn set_stream_active(&mut self, active: bool) {
        self.stream_active = active;
    }

    /// Signal statistics from the frontend monitor.
    pub fn set_signal(&mut self, strength: u16, has_lock: bool, quality: u16) {
        self.signal_strength = strength;
        self.has_lock = has_lock;
        self.signal_quality = quality;
    }

    /// SAT>IP describe string for the RTCP APP packet, e.g.:
    ///
    /// ```text
    /// ver=1.0;src=1;tuner=1,240,1,15,11836.00,v,dvbs2,8psk,auto,0.35,27500,34;pids=0,17,100
    /// ```
    ///
    /// The section layout follows the delivery system family; an untuned
    /// stream reports only the tuner quadruple.
    pub fn attribute_describe_string(&self, pid_csv: &str) -> String {
        let ch = &self.channel;
        let freq_mhz = ch.frequency_khz() as f64 / 1000.0;
        let lock = u8::from(self.has_lock);
        let mtype = ch
            .modulation()
            .or_else(|| ch.delivery_system().map(Modulation::implied_by));
        match ch.delivery_system() {
            Some(system) if system.is_satellite() => format!(
                "ver=1.0;src={};tuner={},{},{},{},{:.2},{},{},{},{},{},{},{};pids={}",
                if ch.diseqc_source() == -1 { 1 } else { ch.diseqc_source() },
                self.stream_id,
                self.signal_strength,
                lock,
                self.signal_quality,
                freq_mhz,
                ch.polarization().map_or_else(String::new, |p| p.to_string()),
                system,
                mtype.map_or_else(String::new, |m| m.to_string()),
                ch.pilot(),
                ch.rolloff(),
                ch.symbol_rate() / 1000,
                ch.fec(),
                pid_csv,
            ),
            Some(system) if system.is_terrestrial() => format!(
                "ver=1.1;tuner={},{},{},{},{:.2},{},{},{},{},{},{},{},{},{};pids={}",
                self.stream_id,
                self.signal_strength,
                lock,
                self.signal_quality,
                freq_mhz,
                ch.bandwidth_hz() / 1_000_000,
                system,
                ch.transmission_mode(),
                mtype.map_or_else(String::new, |m| m.to_string()),
                ch.guard_interval(),
                ch.fec(),
                ch.plp_id().max(0),
                ch.t2_system_id().max(0),
                ch.siso_miso().max(0),
                pid_csv,
            ),
            Some(system) => format!(
                "ver=1.2;tuner={},{},{},{},{:.2},{},{},{},{},{};pids={}",
                self.stream_id,
                self.signal_strength,
                lock,
                self.signal_quality,
                freq_mhz,
                ch.bandwidth_hz() / 1_000_000,
                system,
                mtype.map_or_else(String::new, |m| m.to_string()),
                ch.symbol_rate() / 1000,
                ch.spectral_inversion().max(0),
                pid_csv,
            ),
            None => format!(
                "ver=1.0;tuner={},{},{},{}",
                self.stream_id, self.signal_strength, lock, self.signal_quality
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_raise_changed_flag() {
        let mut ch = ChannelData::new();
        assert!(!ch.has_changed());
        ch.set_frequency_khz(11_836_000);
        assert!(ch.has_changed());
        ch.clear_changed();
        assert!(!ch.has_changed());
    }

    #[test]
    fn initialize_forgets_the_channel() {
        let mut ch = ChannelData::new();
        ch.set_frequency_khz(11_836_000);
        ch.set_polarization(Polarization::Vertical);
        ch.clear_changed();

        ch.initialize();
        assert_eq!(ch.frequency_khz(), 0);
        assert!(ch.polarization().is_none());
        assert!(ch.has_changed());
    }

    #[test]
    fn rtp_accounting() {
        let mut props = StreamProperties::new(1);
        props.add_rtp_data(1316, 90_000);
        props.add_rtp_data(1316, 180_000);
        assert_eq!(props.spc(), 2);
        assert_eq!(props.soc(), 2632);
        assert_eq!(props.timestamp(), 180_000);
    }

    #[test]
    fn fresh_streams_have_distinct_ssrc() {
        let a = StreamProperties::new(0);
        let b = StreamProperties::new(1);
        assert_ne!(a.ssrc(), b.ssrc());
    }

    #[test]
    fn describe_string_satellite() {
        let mut props = StreamProperties::new(1);
        let ch = props.channel_mut();
        ch.set_delivery_system(DeliverySystem::Dvbs2);
        ch.set_frequency_khz(11_836_000);
        ch.set_polarization(Polarization::Vertical);
        ch.set_symbol_rate(27_500_000);
        ch.set_fec(FecCode::F3_4);
        props.set_signal(240, true, 15);

        let desc = props.attribute_describe_string("0,17,100");
        assert!(desc.starts_with("ver=1.0;src=1;tuner=1,240,1,15,11836.00,v,dvbs2,8psk"));
        assert!(desc.ends_with(";pids=0,17,100"));
    }

    #[test]
    fn describe_string_untuned() {
        let props = StreamProperties::new(3);
        assert_eq!(props.attribute_describe_string(""), "ver=1.0;tuner=3,0,0,0");
    }

    #[test]
    fn transport_parameters_round_trip() {
        use crate::protocol::params;

        let mut ch = ChannelData::new();
        ch.set_frequency_khz(11_836_000);
        ch.set_symbol_rate(27_500_000);
        ch.set_delivery_system(DeliverySystem::Dvbs2);
        ch.set_polarization(Polarization::Vertical);
        ch.set_fec(FecCode::F3_4);

        let query = ch.transport_parameters();
        assert_eq!(params::get_double(&query, "freq"), Some(11836.0));
        assert_eq!(params::get_int(&query, "sr"), Some(27500));
        assert_eq!(params::get(&query, "msys"), Some("dvbs2"));
        assert_eq!(params::get(&query, "pol"), Some("v"));
        assert_eq!(params::get(&query, "fec"), Some("34"));
    }
}
