//! 示例插件: 各类探测器的能谱、时间矩阵、击中图和事件表
//!
//! 由 slotframe 按需编译加载，不是 cargo 目标。
//! 记录字段: `crossAmplitude` `crossTime` `backAmplitude` `miscAmplitude` `cebrIntLong` `event`。

use slotframe::prelude::*;

const ENERGY_BINS: usize = 10_000;
const LOW_ENERGY: f64 = 0.0;
const HIGH_ENERGY: f64 = 2000.0;

/// 击中图中各类探测器的起始编号
const BACK_OFFSET: usize = 16;
const MISC_OFFSET: usize = 32;
const CEBR_OFFSET: usize = 48;

pub struct EnergyPlugin {
    gain: f64,
    offset: f64,
}

impl EnergyPlugin {
    pub fn new(args: &InitArgs) -> Result<Self> {
        Ok(Self {
            gain: args.f64_or("gain", 1.0),
            offset: args.f64_or("offset", 0.0),
        })
    }

    fn energy(&self, amplitude: f64) -> f64 {
        self.offset + self.gain * amplitude
    }

    fn fill_energies(&self, store: &mut SlotStore, path: &str, amplitudes: &[f64]) -> Result<()> {
        for &amplitude in amplitudes.iter().filter(|a| !a.is_nan()) {
            store.fill(path, &[self.energy(amplitude)])?;
        }
        Ok(())
    }
}

fn spectrum(label: &str) -> Accumulator {
    Accumulator::h1(label, ENERGY_BINS, LOW_ENERGY, HIGH_ENERGY)
}

impl AnalysisPlugin for EnergyPlugin {
    fn name(&self) -> &str {
        "Energy"
    }

    fn setup_slot(&self, _slot: SlotIndex, store: &mut SlotStore) -> Result<()> {
        store.book_accumulator("energy/crossE", "Cross energy", spectrum("energy [keV]"))?;
        store.book_accumulator("energy/backE", "Back energy", spectrum("energy [keV]"))?;
        store.book_accumulator("energy/miscE", "Misc energy", spectrum("energy [keV]"))?;
        store.book_accumulator("energy/cebrCh", "CeBr channel", spectrum("channel"))?;
        store.book_accumulator("energy/crossAddbackE", "Cross energy using addback", spectrum("energy [keV]"))?;

        store.book_accumulator(
            "timing/crossT",
            "Cross ID vs timing relative to cross 0",
            Accumulator::h2(Axis::new("time [ns]", 1000, -50_000.0, 50_000.0), Axis::new("cross ID", 15, 0.5, 15.5)),
        )?;
        store.book_accumulator(
            "hp",
            "Hit pattern (cross 0-15, back 16-31, misc 32-47, cebr 48-63)",
            Accumulator::h2(Axis::new("ID", 64, -0.5, 63.5), Axis::new("ID", 64, -0.5, 63.5)),
        )?;

        store.book_table(
            "events",
            "Event summary",
            RecordTable::new(&["event", "multiplicity", "addback"]).with_key(&["event"])?,
        )
    }

    fn process(&self, _slot: SlotIndex, record: &Record, store: &mut SlotStore) -> Result<()> {
        let cross = record.f64s("crossAmplitude");
        let cross_time = record.f64s("crossTime");
        let back = record.f64s("backAmplitude");
        let misc = record.f64s("miscAmplitude");
        let cebr = record.f64s("cebrIntLong");

        self.fill_energies(store, "energy/crossE", &cross)?;
        self.fill_energies(store, "energy/backE", &back)?;
        self.fill_energies(store, "energy/miscE", &misc)?;
        for &channel in cebr.iter().filter(|c| !c.is_nan()) {
            store.fill("energy/cebrCh", &[channel])?;
        }

        if let Some(&reference) = cross_time.first() {
            for (id, &time) in cross_time.iter().enumerate().skip(1) {
                store.fill("timing/crossT", &[time - reference, id as f64])?;
            }
        }

        // 每 4 个晶体一个探测器
        let mut total_addback = 0.0;
        for detector in cross.chunks(4) {
            let addback: f64 = detector
                .iter()
                .filter(|a| !a.is_nan())
                .map(|&a| self.energy(a))
                .sum();
            if addback > 0.0 {
                store.fill("energy/crossAddbackE", &[addback])?;
                total_addback += addback;
            }
        }

        let hits: Vec<usize> = [(&cross, 0), (&back, BACK_OFFSET), (&misc, MISC_OFFSET), (&cebr, CEBR_OFFSET)]
            .iter()
            .flat_map(|(values, offset)| {
                values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| !v.is_nan())
                    .map(move |(i, _)| i + offset)
            })
            .collect();
        for &i in &hits {
            for &j in hits.iter().filter(|&&j| j != i) {
                store.fill("hp", &[i as f64, j as f64])?;
            }
        }

        if let Some(event) = record.get("event") {
            if let Some(table) = store.table_mut("events") {
                table.push(vec![event.clone(), json!(hits.len()), json!(total_addback)])?;
            }
        }
        Ok(())
    }

    fn on_run_end(&self, merged: &mut SlotStore) -> Result<()> {
        if let Some(spectrum) = merged.get("energy/crossE").and_then(ResultObject::as_accumulator) {
            slotframe::tracing::info!("Cross energy spectrum holds {} entries", spectrum.entries());
        }
        Ok(())
    }
}

slotframe::declare_plugin!(EnergyPlugin, EnergyPlugin::new);
