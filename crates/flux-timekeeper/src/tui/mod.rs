pub use crate::tui::{
    cycling_list::CyclingListState,
    cycling_table::CyclingTableState,
    keyed_cycling_list::KeyedCyclingListState,
    plot::{Plot, PlotSeries, Plottable},
    plot_settings::{DurationUnit, PlotSettings, XAxisSpec},
    render_flags::RenderFlags,
};

mod cycling_list;
mod cycling_table;
mod keyed_cycling_list;
mod plot;
mod plot_settings;
mod render_flags;
