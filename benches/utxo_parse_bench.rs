//! Benchmark for UTXO listing parsing

use cardano_toolkit::utxo::{exclude_scripts, exclude_tokens, parse_utxos, Utxos};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn listing(rows: usize) -> String {
    let mut out = String::from(
        "                           TxHash                                 TxIx        Amount\n\
         --------------------------------------------------------------------------------------\n",
    );
    for i in 0..rows {
        let hash = format!("{:064x}", i * 7919 + 1);
        match i % 3 {
            0 => out.push_str(&format!(
                "{}     {}        {} lovelace + TxOutDatumHashNone\n",
                hash, i % 4, 1_000_000 + i
            )),
            1 => out.push_str(&format!(
                "{}     {}        {} lovelace + 1000 5a3932c9cbe8b7ac58eefde2de45da2091b6df15052042656114c83c.test + 5 bce9dbdb5dc86a9c5aa29eab233776ef065613d9c50532d72ce698dc.piCoin + TxOutDatumHashNone\n",
                hash, i % 4, 2_000_000 + i
            )),
            _ => out.push_str(&format!(
                "{}     {}        {} lovelace + TxOutDatumHash ScriptDataInAlonzoEra \"{:064x}\"\n",
                hash, i % 4, 3_000_000 + i, i
            )),
        }
    }
    out
}

fn bench_parse(c: &mut Criterion) {
    let small = listing(10);
    let large = listing(1_000);

    c.bench_function("parse_utxos_10", |b| {
        b.iter(|| black_box(parse_utxos(black_box(&small))))
    });
    c.bench_function("parse_utxos_1000", |b| {
        b.iter(|| black_box(parse_utxos(black_box(&large))))
    });
}

fn bench_filter(c: &mut Criterion) {
    let large = listing(1_000);

    c.bench_function("parse_and_filter_1000", |b| {
        b.iter(|| {
            black_box(Utxos::parse(black_box(&large)).filter(&[exclude_scripts(), exclude_tokens()]))
        })
    });
}

criterion_group!(benches, bench_parse, bench_filter);
criterion_main!(benches);
