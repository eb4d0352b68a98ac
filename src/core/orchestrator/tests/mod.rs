
mod startup;
