mod cycles;
mod spills;
mod structural;
